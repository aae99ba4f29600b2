//! Transaction (C7): per-transaction state, hash chain, child-pager
//! tracking, commit/abort. Grounded on `spanner/src/transaction.rs`'s
//! `Transaction` (session + sequence counter) and
//! `spanner/src/transaction_rw.rs`'s `commit`/`finish`/`rollback` triad,
//! generalized from Spanner's mutation-buffer + OCC digest to this
//! protocol's running commit-hash digest (`spec.md` §4.7).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::DriverError;
use crate::hash::{self, statement_fingerprint, CommitHash};
use crate::pager::Pager;
use crate::session_channel::SessionChannel;
use crate::transport::Param;
use crate::value::{Value, ValueCodec};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Open,
    Committed,
    Aborted,
}

/// One statement plus its positional parameters.
pub struct Statement {
    pub text: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Statement {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(text: impl Into<String>, params: Vec<Value>) -> Self {
        Statement {
            text: text.into(),
            params,
        }
    }
}

/// `{ id, session, hash, pagers, closed }`. Initial hash = `H(id)`. Any
/// operation other than `abort` after a terminal state fails with
/// [`DriverError::TransactionClosed`].
///
/// Classification (`retryable`/`session_alive`) for errors surfaced from
/// this type's methods is recovered from the `DriverError` variant itself
/// by [`crate::error::classify`], not carried alongside as a separate
/// envelope — that keeps this type's public API plain `Result<_,
/// DriverError>`, usable with `?` from an ordinary application `async fn`.
pub struct Transaction {
    id: String,
    channel: Arc<SessionChannel>,
    codec: Arc<dyn ValueCodec>,
    read_ahead: usize,
    hash: CommitHash,
    state: State,
    closed_token: CancellationToken,
}

impl Transaction {
    pub(crate) async fn begin(
        channel: Arc<SessionChannel>,
        codec: Arc<dyn ValueCodec>,
        read_ahead: usize,
    ) -> Result<Self, DriverError> {
        let id = channel.start_transaction().await.map_err(|w| w.cause)?;
        let hash = hash::hash_text(&id);
        Ok(Transaction {
            id,
            channel,
            codec,
            read_ahead,
            hash,
            state: State::Open,
            closed_token: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.state != State::Open {
            return Err(DriverError::TransactionClosed);
        }
        Ok(())
    }

    /// Updates the transaction hash to
    /// `dot(hash, H(stmt) . H(p1) . ... . H(pN))` BEFORE sending (so a
    /// retried same-txn replay is never attempted: retries always start a
    /// new txn with a new id), then issues `executeStatement`. The
    /// returned pager shares this transaction's cancellation token, so it
    /// closes transitively when the transaction does.
    pub async fn execute(&mut self, stmt: Statement) -> Result<Pager, DriverError> {
        self.ensure_open()?;
        if stmt.text.trim().is_empty() {
            return Err(DriverError::InvalidArgument(
                "statement text must not be empty".into(),
            ));
        }

        let stmt_hash = hash::hash_text(&stmt.text);
        let mut param_hashes = Vec::with_capacity(stmt.params.len());
        let mut encoded_params = Vec::with_capacity(stmt.params.len());
        for p in &stmt.params {
            let h = self.codec.hash(p)?;
            param_hashes.push(h);
            let encoded = self.codec.encode(p)?;
            encoded_params.push(Param { encoded });
        }
        let fingerprint = statement_fingerprint(stmt_hash, &param_hashes);
        self.hash = hash::dot(&self.hash, &fingerprint);

        let (page, io, timing) = self
            .channel
            .execute_statement(&self.id, stmt.text, encoded_params)
            .await
            .map_err(|w| w.cause)?;

        Ok(Pager::new(
            self.channel.clone(),
            self.codec.clone(),
            self.id.clone(),
            self.closed_token.clone(),
            page,
            io,
            timing,
            self.read_ahead,
        ))
    }

    /// Closes all child pagers, sends `abortTransaction`; swallows
    /// errors. Returns whether the abort was observed to succeed on the
    /// wire, for callers (`Session::execute`) that need to know.
    pub async fn abort(&mut self) -> bool {
        if self.state != State::Open {
            return true;
        }
        self.internal_close();
        self.state = State::Aborted;
        let ok = self.channel.abort_transaction().await.is_ok();
        tracing::trace!("transaction {} aborted (wire ack: {})", self.id, ok);
        ok
    }

    /// Sends `commitTransaction(id, currentHash)`; on success, compares
    /// the server-returned commit digest with `currentHash` byte-for-byte.
    /// Mismatch fails with [`DriverError::CommitDigestMismatch`] (fatal,
    /// never retried).
    pub async fn commit(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;
        let digest = self
            .channel
            .commit_transaction(&self.id, self.hash.as_bytes().to_vec())
            .await
            .map_err(|w| w.cause)?;

        self.internal_close();

        if digest != self.hash.as_bytes() {
            tracing::error!(
                "commit digest mismatch for transaction {}: server and client disagree on the committed hash chain",
                self.id
            );
            self.state = State::Aborted;
            return Err(DriverError::CommitDigestMismatch);
        }
        self.state = State::Committed;
        tracing::trace!("transaction {} committed", self.id);
        Ok(())
    }

    /// Signals every outstanding pager (closed transitively via the
    /// shared cancellation token) that this transaction is done.
    pub(crate) fn internal_close(&mut self) {
        self.closed_token.cancel();
    }

    pub fn current_hash(&self) -> &CommitHash {
        &self.hash
    }
}
