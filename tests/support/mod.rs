//! Shared test support: an in-process [`MockTransport`] standing in for the
//! out-of-scope wire codec, plus a couple of small `BackoffPolicy`
//! recorders. Grounded on the *style* of `spanner/tests/*` (shared
//! `common.rs`-style fixtures via `#[tokio::test]`) but not its
//! infrastructure, since there's no real ledger service here to run an
//! emulator-backed integration test against.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use ledger_driver::backoff::{BackoffPolicy, RetryContext};
use ledger_driver::error::TransportError;
use ledger_driver::transport::{Command, InboundFrame, Page, Transport};

/// One scripted step in a mock session's life: either a canned reply, a
/// reply computed from the inbound `CommitTransaction`'s digest (so a test
/// can agree with or deliberately contradict the client's hash), or an
/// instruction to drop the stream outright (simulating a transport-level
/// failure mid-session).
enum Step {
    Fixed(InboundFrame),
    Commit(Box<dyn Fn(&[u8]) -> InboundFrame + Send + Sync>),
    Drop,
}

/// A scripted sequence of replies for one `open_session` call. Commands
/// are matched strictly in arrival order, not by variant — callers are
/// expected to know what their transaction body sends and in what order.
/// `EndSession` is always auto-acknowledged regardless of the script, since
/// nearly every test closes its session one way or another and scripting
/// it explicitly everywhere would be pure noise.
pub struct MockSession {
    steps: VecDeque<Step>,
}

impl MockSession {
    pub fn new() -> Self {
        MockSession {
            steps: VecDeque::new(),
        }
    }

    pub fn start_transaction(mut self, id: impl Into<String>) -> Self {
        self.steps.push_back(Step::Fixed(InboundFrame::TransactionStart {
            transaction_id: id.into(),
        }));
        self
    }

    pub fn execute_page(mut self, page: Page) -> Self {
        self.steps.push_back(Step::Fixed(InboundFrame::ExecutePage {
            first_page: page,
            consumed_ios: None,
            timing: None,
        }));
        self
    }

    pub fn fetched_page(mut self, page: Page) -> Self {
        self.steps.push_back(Step::Fixed(InboundFrame::FetchedPage {
            page,
            consumed_ios: None,
            timing: None,
        }));
        self
    }

    /// Replies with the digest the client actually sent: a well-behaved
    /// server agreeing on the commit hash.
    pub fn commit_ok(mut self) -> Self {
        self.steps.push_back(Step::Commit(Box::new(|digest| {
            InboundFrame::CommitResult {
                commit_digest: digest.to_vec(),
                consumed_ios: None,
                timing: None,
            }
        })));
        self
    }

    /// Replies with a digest that deliberately disagrees with the client's
    /// running hash, for exercising `CommitDigestMismatch` (S5).
    pub fn commit_mismatch(mut self) -> Self {
        self.steps.push_back(Step::Commit(Box::new(|_digest| {
            InboundFrame::CommitResult {
                commit_digest: vec![0xAAu8; 32],
                consumed_ios: None,
                timing: None,
            }
        })));
        self
    }

    pub fn abort_ok(mut self) -> Self {
        self.steps.push_back(Step::Fixed(InboundFrame::AbortResult));
        self
    }

    pub fn transaction_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.steps.push_back(Step::Fixed(InboundFrame::TransactionError {
            code: code.into(),
            message: message.into(),
        }));
        self
    }

    pub fn statement_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.steps.push_back(Step::Fixed(InboundFrame::StatementError {
            code: code.into(),
            message: message.into(),
        }));
        self
    }

    /// Drops the stream on the next command, simulating a transport-layer
    /// failure reaching the server.
    pub fn transport_fail(mut self) -> Self {
        self.steps.push_back(Step::Drop);
        self
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out one scripted [`MockSession`] per `open_session` call, in
/// order. Exhausting the script (more commands arrive than were scripted)
/// closes the stream, which the session channel surfaces as a transport
/// error — the same thing a real connection drop looks like from the
/// client's side.
pub struct MockTransport {
    sessions: Mutex<VecDeque<MockSession>>,
    opened: AtomicUsize,
    default_max_concurrent: usize,
}

impl MockTransport {
    pub fn new(sessions: Vec<MockSession>) -> Self {
        MockTransport {
            sessions: Mutex::new(sessions.into_iter().collect()),
            opened: AtomicUsize::new(0),
            default_max_concurrent: 8,
        }
    }

    pub fn with_max_concurrent(sessions: Vec<MockSession>, max_concurrent: usize) -> Self {
        MockTransport {
            sessions: Mutex::new(sessions.into_iter().collect()),
            opened: AtomicUsize::new(0),
            default_max_concurrent: max_concurrent,
        }
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_session(
        &self,
        _ledger_name: &str,
    ) -> Result<(mpsc::Sender<Command>, mpsc::Receiver<InboundFrame>), TransportError> {
        let session = self
            .sessions
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::new("mock transport exhausted: no more scripted sessions"))?;

        let idx = self.opened.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("mock-session-{idx}");

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(8);
        let (frame_tx, frame_rx) = mpsc::channel::<InboundFrame>(8);

        tokio::spawn(async move {
            if frame_tx
                .send(InboundFrame::SessionStart { session_id })
                .await
                .is_err()
            {
                return;
            }
            let mut steps = session.steps;
            while let Some(cmd) = cmd_rx.recv().await {
                if matches!(cmd, Command::EndSession) {
                    let _ = frame_tx.send(InboundFrame::EndSessionResult).await;
                    continue;
                }
                let Some(step) = steps.pop_front() else {
                    break;
                };
                match step {
                    Step::Fixed(frame) => {
                        if frame_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Step::Commit(f) => {
                        if let Command::CommitTransaction { commit_digest, .. } = &cmd {
                            let frame = f(commit_digest);
                            if frame_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Step::Drop => break,
                }
            }
        });

        Ok((cmd_tx, frame_rx))
    }

    fn default_max_concurrent(&self) -> usize {
        self.default_max_concurrent
    }
}

/// Records every attempt number it's asked to back off for, so a test can
/// assert invariant 8 (strictly increasing attempts starting at 1) and the
/// exact retry count. Always returns a fixed, short delay so tests don't
/// pay real backoff latency.
pub struct RecordingBackoff {
    pub attempts: Arc<Mutex<Vec<u32>>>,
    delay: Duration,
}

impl RecordingBackoff {
    pub fn new(delay: Duration) -> (Self, Arc<Mutex<Vec<u32>>>) {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        (
            RecordingBackoff {
                attempts: attempts.clone(),
                delay,
            },
            attempts,
        )
    }
}

impl BackoffPolicy for RecordingBackoff {
    fn calculate_delay(&self, ctx: &RetryContext) -> Duration {
        self.attempts.lock().push(ctx.attempt);
        self.delay
    }
}
