use std::fmt;

/// Crate-wide error taxonomy.
///
/// Variants are grouped by how they're handled: resource
/// misuse (never retried), transient server/transport conditions (retried by
/// [`crate::driver::Driver::execute`] per the active [`crate::retry::RetryPolicy`]),
/// and fatal integrity failures.
#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    /// The driver has been closed; no further `Execute` calls are accepted.
    #[error("driver is closed")]
    DriverClosed,

    /// A request was issued against a session that is no longer usable.
    #[error("session is closed")]
    SessionClosed,

    /// An operation other than `abort` was issued against a transaction that
    /// has already committed or aborted.
    #[error("transaction is closed")]
    TransactionClosed,

    /// A pager's parent transaction is no longer open.
    #[error("result pager's parent transaction is no longer active")]
    ResultParentInactive,

    /// `next()` was called a second time on a single-pass result stream.
    #[error("result stream has already been iterated")]
    StreamAlreadyIterated,

    /// No pooled or freshly-opened session became available within the
    /// configured (or caller-supplied) pool timeout.
    #[error("no session became available within the configured timeout")]
    NoSessionAvailable,

    /// The wait for a pool permit was interrupted (task cancelled) before a
    /// session became available.
    #[error("interrupted while waiting for a session")]
    InterruptedWaitingForSession,

    /// A caller-supplied argument failed validation (empty statement, null
    /// parameter list, `read_ahead == 1`, non-positive pool size, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The value codec adapter (C2) failed to encode or hash a parameter.
    #[error("failed to serialize value: {0}")]
    Serialization(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The server rejected an individual statement within an open
    /// transaction. Retryable in a fresh transaction on the same session.
    #[error("statement error {code}: {message}")]
    StatementFault { code: String, message: String },

    /// The server rejected the transaction as a whole (for example, it was
    /// invalidated server-side). Retryable in a fresh transaction on the
    /// same session.
    #[error("transaction error {code}: {message}")]
    TransactionFault { code: String, message: String },

    /// Optimistic-concurrency validation failed at commit time. Retryable in
    /// a fresh transaction.
    #[error("optimistic concurrency conflict")]
    OccConflict,

    /// The server indicated the session is no longer valid. Retryable, but
    /// only with a freshly opened session.
    #[error("session expired")]
    SessionExpired,

    /// A retryable server-side failure (internal error, service
    /// unavailable/capacity exceeded). Retryable with a freshly opened
    /// session.
    #[error("server error ({code}): {message}")]
    Server5xx { code: u16, message: String },

    /// Any other non-2xx server response. Not retried.
    #[error("server rejected the request ({code}): {message}")]
    ServerRejected { code: u16, message: String },

    /// A transport/network-layer failure reaching the server. Retryable with
    /// a freshly opened session.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Opening a session failed: the initial response signalled an error,
    /// or no response arrived before the timeout.
    #[error("failed to start session: {0}")]
    SessionStartFailed(String),

    /// The commit digest returned by the server did not match the locally
    /// computed running hash. Fatal: never retried, even if retry budget
    /// remains.
    #[error("commit digest mismatch: the server and client disagree on the transaction's content")]
    CommitDigestMismatch,

    /// The application lambda explicitly asked to abort the transaction.
    /// Never retried; always surfaced to the caller.
    #[error("transaction aborted by application")]
    AbortSignal,

    /// Any other error raised by the application's transaction lambda.
    #[error("application transaction body failed: {0}")]
    RuntimeError(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Classifies a cause into `(retryable, session_alive)`. Every variant's
/// classification is fixed
/// except [`DriverError::RuntimeError`], whose `session_alive` depends on
/// whether the best-effort abort that preceded it succeeded — callers
/// pass that outcome in as `abort_ok`.
///
/// [`DriverError::AbortSignal`] is handled by the caller before reaching
/// this table: it is never retried and always surfaced, regardless of
/// `abort_ok`.
pub(crate) fn classify(cause: &DriverError, abort_ok: bool) -> (bool, bool) {
    match cause {
        DriverError::AbortSignal => (false, true),
        DriverError::TransactionFault { .. } | DriverError::StatementFault { .. } => (true, true),
        DriverError::OccConflict => (true, true),
        DriverError::SessionExpired => (true, false),
        DriverError::Server5xx { .. } => (true, false),
        DriverError::Transport(_) => (true, false),
        DriverError::CommitDigestMismatch => (false, false),
        DriverError::ServerRejected { .. } => (false, true),
        DriverError::RuntimeError(_) => (false, abort_ok),
        // Misuse-of-a-terminated-resource and argument/serialization
        // errors: surfaced, never retried; the session itself is still
        // sound.
        _ => (false, true),
    }
}

/// Transport/network-layer failure surfaced by a [`crate::transport::Transport`]
/// implementation. The wire codec itself is out of scope for this crate;
/// this type is the narrow shape a `Transport` is expected to report
/// failures through.
#[derive(thiserror::Error, Debug)]
pub struct TransportError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        TransportError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Internal classification envelope passed from [`crate::session::Session::execute`]
/// up to [`crate::driver::Driver::execute`]'s retry loop.
///
/// Mirrors `spanner/src/retry.rs`'s `SessionRetryAction<E>` / `(E, Option<ManagedSession>)`
/// pair: the cause travels together with enough metadata for the caller to
/// decide whether to keep the session, retry, or rethrow, without the
/// `Session`/`Driver` boundary needing to downcast the error.
pub(crate) struct Wrapped {
    pub cause: DriverError,
    pub retryable: bool,
    pub session_alive: bool,
    pub is_abort: bool,
    pub txn_id: Option<String>,
}

impl Wrapped {
    pub fn new(cause: DriverError, retryable: bool, session_alive: bool) -> Self {
        Wrapped {
            cause,
            retryable,
            session_alive,
            is_abort: false,
            txn_id: None,
        }
    }

    pub fn abort(cause: DriverError, session_alive: bool) -> Self {
        Wrapped {
            cause,
            retryable: false,
            session_alive,
            is_abort: true,
            txn_id: None,
        }
    }

    pub fn with_txn_id(mut self, txn_id: impl Into<String>) -> Self {
        self.txn_id = Some(txn_id.into());
        self
    }
}
