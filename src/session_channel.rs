//! Session channel (C5): owns one bidirectional stream to the server and
//! multiplexes command -> result via a FIFO of pending completions.
//!
//! Grounded on `spanner/src/session.rs`'s `SessionManager`/`SessionPool`
//! background-task management (`tokio::spawn`, `oneshot` waiters),
//! adapted from "pool of sessions" to "one multiplexed stream per
//! session."

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{DriverError, TransportError, Wrapped};
use crate::transport::{Command, InboundFrame, Transport};

type PendingSlot = oneshot::Sender<Result<InboundFrame, Wrapped>>;

/// One bidirectional stream to the server, opened for a single session.
///
/// The caller of a request method blocks until the returned future
/// completes; the outbound half is a plain `mpsc::Sender` (serializes
/// writes by construction) and a single background task drains the
/// inbound half, completing the head of `pending` for each frame in
/// order. `pending` is bounded to 1 (strict request/response) unless
/// `pipeline_depth` widens it.
pub struct SessionChannel {
    session_id: String,
    outbound: mpsc::Sender<Command>,
    pending: Arc<Mutex<VecDeque<PendingSlot>>>,
    pipeline_depth: usize,
    consumer: tokio::task::JoinHandle<()>,
}

impl SessionChannel {
    /// Opens a new session against `ledger_name` over `transport`. Fails
    /// with [`DriverError::SessionStartFailed`] if the initial frame is
    /// not `SessionStart`, or times out after `open_timeout`.
    pub async fn open(
        transport: &dyn Transport,
        ledger_name: &str,
        pipeline_depth: usize,
        open_timeout: Duration,
    ) -> Result<Self, DriverError> {
        let (outbound, mut inbound) = tokio::time::timeout(
            open_timeout,
            transport.open_session(ledger_name),
        )
        .await
        .map_err(|_| DriverError::SessionStartFailed("timed out opening session".into()))?
        .map_err(DriverError::Transport)?;

        let first = tokio::time::timeout(open_timeout, inbound.recv())
            .await
            .map_err(|_| {
                DriverError::SessionStartFailed("timed out awaiting session start".into())
            })?;

        let session_id = match first {
            Some(InboundFrame::SessionStart { session_id }) => session_id,
            Some(InboundFrame::TransactionError { code, message })
            | Some(InboundFrame::StatementError { code, message }) => {
                return Err(DriverError::SessionStartFailed(format!(
                    "{code}: {message}"
                )))
            }
            Some(_) => {
                return Err(DriverError::SessionStartFailed(
                    "unexpected initial frame".into(),
                ))
            }
            None => {
                return Err(DriverError::SessionStartFailed(
                    "stream closed before session start".into(),
                ))
            }
        };

        tracing::debug!("session {} opened against ledger {}", session_id, ledger_name);

        let pending: Arc<Mutex<VecDeque<PendingSlot>>> = Arc::new(Mutex::new(VecDeque::new()));
        let consumer = tokio::spawn(consume_inbound(inbound, pending.clone()));

        Ok(SessionChannel {
            session_id,
            outbound,
            pending,
            pipeline_depth: pipeline_depth.max(1),
            consumer,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn call(&self, command: Command) -> Result<InboundFrame, Wrapped> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.len() >= self.pipeline_depth {
                // Strict request/response: caller methods are always
                // awaited individually by Session/Transaction, so this
                // only trips if pipelining was requested beyond the
                // configured depth.
                drop(pending);
                return Err(Wrapped::new(
                    DriverError::Transport(TransportError::new(
                        "pending queue depth exceeded",
                    )),
                    true,
                    false,
                ));
            }
            pending.push_back(tx);
        }
        if self.outbound.send(command).await.is_err() {
            self.fail_all_pending("stream closed");
            return Err(Wrapped::new(
                DriverError::Transport(TransportError::new("outbound stream closed")),
                true,
                false,
            ));
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Wrapped::new(
                DriverError::Transport(TransportError::new(
                    "response channel dropped before completion",
                )),
                true,
                false,
            )),
        }
    }

    fn fail_all_pending(&self, reason: &str) {
        let mut pending = self.pending.lock();
        while let Some(slot) = pending.pop_front() {
            let _ = slot.send(Err(Wrapped::new(
                DriverError::Transport(TransportError::new(reason.to_string())),
                true,
                false,
            )));
        }
    }

    pub async fn start_transaction(&self) -> Result<String, Wrapped> {
        match self.call(Command::StartTransaction).await? {
            InboundFrame::TransactionStart { transaction_id } => Ok(transaction_id),
            other => Err(unexpected_frame(other)),
        }
    }

    pub async fn execute_statement(
        &self,
        transaction_id: &str,
        statement: String,
        parameters: Vec<crate::transport::Param>,
    ) -> Result<
        (
            crate::transport::Page,
            Option<crate::transport::IoUsage>,
            Option<crate::transport::TimingInfo>,
        ),
        Wrapped,
    > {
        let cmd = Command::ExecuteStatement {
            transaction_id: transaction_id.to_string(),
            statement,
            parameters,
        };
        match self.call(cmd).await? {
            InboundFrame::ExecutePage {
                first_page,
                consumed_ios,
                timing,
            } => Ok((first_page, consumed_ios, timing)),
            other => Err(unexpected_frame(other)),
        }
    }

    pub async fn fetch_page(
        &self,
        transaction_id: &str,
        next_page_token: String,
    ) -> Result<
        (
            crate::transport::Page,
            Option<crate::transport::IoUsage>,
            Option<crate::transport::TimingInfo>,
        ),
        Wrapped,
    > {
        let cmd = Command::FetchPage {
            transaction_id: transaction_id.to_string(),
            next_page_token,
        };
        match self.call(cmd).await? {
            InboundFrame::FetchedPage {
                page,
                consumed_ios,
                timing,
            } => Ok((page, consumed_ios, timing)),
            other => Err(unexpected_frame(other)),
        }
    }

    pub async fn commit_transaction(
        &self,
        transaction_id: &str,
        commit_digest: Vec<u8>,
    ) -> Result<Vec<u8>, Wrapped> {
        let cmd = Command::CommitTransaction {
            transaction_id: transaction_id.to_string(),
            commit_digest,
        };
        match self.call(cmd).await? {
            InboundFrame::CommitResult { commit_digest, .. } => Ok(commit_digest),
            other => Err(unexpected_frame(other)),
        }
    }

    /// Errors are swallowed by the caller (`Transaction::abort`); this
    /// method still surfaces them so the caller can log/ignore.
    pub async fn abort_transaction(&self) -> Result<(), Wrapped> {
        match self.call(Command::AbortTransaction).await? {
            InboundFrame::AbortResult => Ok(()),
            other => Err(unexpected_frame(other)),
        }
    }

    /// Sends `endSession` and awaits completion; errors are logged but
    /// swallowed by the caller.
    pub async fn end_session(&self) -> Result<(), Wrapped> {
        match self.call(Command::EndSession).await {
            Ok(InboundFrame::EndSessionResult) => Ok(()),
            Ok(other) => Err(unexpected_frame(other)),
            Err(e) => Err(e),
        }
    }

    pub fn close(&self) {
        self.consumer.abort();
        self.fail_all_pending("session closed");
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

/// The server reports every statement/transaction-level failure through a
/// uniform `TransactionError{code, message}` / `StatementError{code,
/// message}` frame (`spec.md` §6). A handful of `code` values carry more
/// specific meaning than a plain fault and classify differently per
/// §4.9's table; this is where that refinement happens, closest to the
/// wire.
fn classify_server_fault(code: String, message: String, is_transaction: bool) -> Wrapped {
    match code.as_str() {
        "SessionExpired" => Wrapped::new(DriverError::SessionExpired, true, false),
        "OccConflict" => Wrapped::new(DriverError::OccConflict, true, true),
        "500" | "InternalServerError" => {
            Wrapped::new(DriverError::Server5xx { code: 500, message }, true, false)
        }
        "503" | "ServiceUnavailable" | "CapacityExceeded" => {
            Wrapped::new(DriverError::Server5xx { code: 503, message }, true, false)
        }
        _ if is_4xx(&code) => {
            let numeric = code.parse::<u16>().unwrap_or(400);
            Wrapped::new(DriverError::ServerRejected { code: numeric, message }, false, true)
        }
        _ if is_transaction => {
            Wrapped::new(DriverError::TransactionFault { code, message }, true, true)
        }
        _ => Wrapped::new(DriverError::StatementFault { code, message }, true, true),
    }
}

/// Recognizes the server's 4xx-class fault codes: either a literal numeric
/// status in `400..500`, or the named equivalents the ledger's statement
/// validation reports (bad statement text, invalid parameter, and the
/// like). Per §4.9's table these are never retried, just surfaced.
fn is_4xx(code: &str) -> bool {
    if let Ok(n) = code.parse::<u16>() {
        return (400..500).contains(&n);
    }
    matches!(
        code,
        "BadRequest"
            | "InvalidStatement"
            | "InvalidParameter"
            | "InvalidParameters"
            | "Unauthorized"
            | "Forbidden"
            | "NotFound"
    )
}

fn unexpected_frame(frame: InboundFrame) -> Wrapped {
    Wrapped::new(
        DriverError::Transport(TransportError::new(format!(
            "unexpected frame from server: {frame:?}"
        ))),
        true,
        false,
    )
}

impl std::fmt::Debug for InboundFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InboundFrame::SessionStart { .. } => "SessionStart",
            InboundFrame::TransactionStart { .. } => "TransactionStart",
            InboundFrame::ExecutePage { .. } => "ExecutePage",
            InboundFrame::FetchedPage { .. } => "FetchedPage",
            InboundFrame::CommitResult { .. } => "CommitResult",
            InboundFrame::AbortResult => "AbortResult",
            InboundFrame::EndSessionResult => "EndSessionResult",
            InboundFrame::TransactionError { .. } => "TransactionError",
            InboundFrame::StatementError { .. } => "StatementError",
        };
        f.write_str(name)
    }
}

/// Single-threaded response consumer: pops the head of `pending` for each
/// inbound frame. `TransactionError`/`StatementError` complete
/// exceptionally; everything else completes successfully. A closed
/// inbound stream (transport-level error) forwards failure to every
/// currently pending future; subsequent enqueues observe the closed
/// `outbound` sender and fail on their own.
async fn consume_inbound(
    mut inbound: mpsc::Receiver<InboundFrame>,
    pending: Arc<Mutex<VecDeque<PendingSlot>>>,
) {
    while let Some(frame) = inbound.recv().await {
        let slot = {
            let mut pending = pending.lock();
            pending.pop_front()
        };
        let Some(slot) = slot else {
            tracing::warn!("received frame with no pending completion: {frame:?}");
            continue;
        };
        let result = match frame {
            InboundFrame::TransactionError { code, message } => {
                Err(classify_server_fault(code, message, true))
            }
            InboundFrame::StatementError { code, message } => {
                Err(classify_server_fault(code, message, false))
            }
            other => Ok(other),
        };
        let _ = slot.send(result);
    }
    // Stream closed: fail every still-pending completion.
    let mut pending = pending.lock();
    while let Some(slot) = pending.pop_front() {
        let _ = slot.send(Err(Wrapped::new(
            DriverError::Transport(TransportError::new("stream closed")),
            true,
            false,
        )));
    }
}
