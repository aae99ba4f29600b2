//! The wire codec's interface (out of scope as an implementation, in
//! scope as a seam): command/result frame types mirroring `spec.md` §6
//! field-for-field, and the `Transport` trait a caller supplies to open a
//! bidirectional stream per session.
//!
//! Grounded on `spanner/src/apiv1/conn_pool.rs`'s injection-point pattern
//! (the rest of the crate depends on a connection only through a
//! trait-shaped seam), generalized per `spec.md` §9's "pick one wire
//! variant" design note.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// One bound parameter's canonical encoding, as produced by
/// [`crate::value::ValueCodec::encode`].
#[derive(Clone, Debug)]
pub struct Param {
    pub encoded: Vec<u8>,
}

/// Outbound command union (`spec.md` §6).
#[derive(Clone, Debug)]
pub enum Command {
    StartSession {
        ledger_name: String,
    },
    StartTransaction,
    ExecuteStatement {
        transaction_id: String,
        statement: String,
        parameters: Vec<Param>,
    },
    FetchPage {
        transaction_id: String,
        next_page_token: String,
    },
    CommitTransaction {
        transaction_id: String,
        commit_digest: Vec<u8>,
    },
    AbortTransaction,
    EndSession,
}

/// A single page of statement results. `values[i]` is the canonical
/// binary encoding of one row.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub values: Vec<Vec<u8>>,
    pub next_page_token: Option<String>,
}

/// IO counters optionally returned alongside execute/fetch/commit results.
#[derive(Clone, Copy, Debug, Default)]
pub struct IoUsage {
    pub read_ios: u64,
    pub write_ios: u64,
}

/// Server timing breakdown optionally returned alongside results.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimingInfo {
    pub processing_time_millis: u64,
}

/// Inbound result union (`spec.md` §6). `Debug` is implemented by hand in
/// `session_channel.rs` (frame name only — a page's raw row bytes aren't
/// worth printing).
#[derive(Clone)]
pub enum InboundFrame {
    SessionStart {
        session_id: String,
    },
    TransactionStart {
        transaction_id: String,
    },
    ExecutePage {
        first_page: Page,
        consumed_ios: Option<IoUsage>,
        timing: Option<TimingInfo>,
    },
    FetchedPage {
        page: Page,
        consumed_ios: Option<IoUsage>,
        timing: Option<TimingInfo>,
    },
    CommitResult {
        commit_digest: Vec<u8>,
        consumed_ios: Option<IoUsage>,
        timing: Option<TimingInfo>,
    },
    AbortResult,
    EndSessionResult,
    TransactionError {
        code: String,
        message: String,
    },
    StatementError {
        code: String,
        message: String,
    },
}

/// The out-of-scope RPC layer's interface: a caller-supplied factory
/// producing one bidirectional command/result channel pair per session.
/// The wire codec itself (framing, transport security, serialization of
/// these frames onto an actual connection) is assumed to exist externally;
/// this crate depends on it only through this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a new session-scoped bidirectional stream. Returns the
    /// outbound command sender and inbound frame receiver; the first
    /// frame received MUST be `SessionStart` or the call fails with
    /// `SessionStartFailed`.
    async fn open_session(
        &self,
        ledger_name: &str,
    ) -> Result<(mpsc::Sender<Command>, mpsc::Receiver<InboundFrame>), TransportError>;

    /// The transport's inherent connection concurrency limit, used as the
    /// pool's default `max_concurrent_transactions` when the caller does
    /// not supply one (`spec.md` §4.9).
    fn default_max_concurrent(&self) -> usize {
        1
    }
}
