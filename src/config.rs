//! Driver configuration surface. Grounded on
//! `spanner/src/client.rs`'s `ClientConfig`/`ChannelConfig` and
//! `spanner/src/session.rs`'s `SessionConfig`: both are options-structs
//! with a `Default` impl and single-point validation, which this module
//! follows via [`DriverConfigBuilder::build`].

use std::sync::Arc;
use std::time::Duration;

use crate::backoff::EqualJitterBackoff;
use crate::error::DriverError;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::value::{ProstValueCodec, ValueCodec};

/// Default pool-acquire timeout: how long `Execute` waits for a free
/// session before failing with `NoSessionAvailable`.
pub const DEFAULT_POOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for opening a session and awaiting its `SessionStart`
/// response.
pub const DEFAULT_SESSION_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Validated, immutable driver configuration produced by
/// [`DriverConfigBuilder::build`].
pub struct DriverConfig {
    pub(crate) ledger: String,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) max_concurrent_transactions: usize,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) read_ahead: usize,
    pub(crate) pool_timeout: Duration,
    pub(crate) session_open_timeout: Duration,
    pub(crate) value_codec: Arc<dyn ValueCodec>,
    pub(crate) user_agent_suffix: Option<String>,
    pub(crate) pipeline_depth: usize,
}

impl DriverConfig {
    pub fn user_agent(&self) -> String {
        let base = format!("ledger-driver/{}", env!("CARGO_PKG_VERSION"));
        match &self.user_agent_suffix {
            Some(suffix) => format!("{base} {suffix}"),
            None => base,
        }
    }
}

/// Builder for [`DriverConfig`]. `ledger` and `transport` are required;
/// everything else has a sensible default. Unknown/contradictory values
/// cause a validation failure at `build()`, not before.
pub struct DriverConfigBuilder {
    ledger: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    max_concurrent_transactions: Option<usize>,
    retry_policy: Option<RetryPolicy>,
    read_ahead: usize,
    pool_timeout: Duration,
    session_open_timeout: Duration,
    value_codec: Arc<dyn ValueCodec>,
    user_agent_suffix: Option<String>,
    pipeline_depth: usize,
}

impl Default for DriverConfigBuilder {
    fn default() -> Self {
        DriverConfigBuilder {
            ledger: None,
            transport: None,
            max_concurrent_transactions: None,
            retry_policy: None,
            read_ahead: 0,
            pool_timeout: DEFAULT_POOL_TIMEOUT,
            session_open_timeout: DEFAULT_SESSION_OPEN_TIMEOUT,
            value_codec: Arc::new(ProstValueCodec),
            user_agent_suffix: None,
            pipeline_depth: 1,
        }
    }
}

impl DriverConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(mut self, ledger: impl Into<String>) -> Self {
        self.ledger = Some(ledger.into());
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn max_concurrent_transactions(mut self, n: usize) -> Self {
        self.max_concurrent_transactions = Some(n);
        self
    }

    pub fn transaction_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// `{0} ∪ [2, ∞)`: `0` disables read-ahead (synchronous mode), `1` is
    /// rejected at `build()` time (a queue of depth 1 can't prefetch
    /// anything), `>= 2` sizes the read-ahead queue.
    pub fn read_ahead(mut self, n: usize) -> Self {
        self.read_ahead = n;
        self
    }

    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = timeout;
        self
    }

    pub fn session_open_timeout(mut self, timeout: Duration) -> Self {
        self.session_open_timeout = timeout;
        self
    }

    pub fn value_codec(mut self, codec: Arc<dyn ValueCodec>) -> Self {
        self.value_codec = codec;
        self
    }

    /// Appended to the `driver-name/<semver>` user agent, so applications
    /// and higher-level frameworks embedding this driver can identify
    /// themselves to the server.
    pub fn user_agent_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.user_agent_suffix = Some(suffix.into());
        self
    }

    /// Widens the session channel's pending-FIFO beyond the strict
    /// request/response default of 1, allowing several in-flight commands
    /// per session.
    pub fn pipeline_depth(mut self, depth: usize) -> Self {
        self.pipeline_depth = depth;
        self
    }

    pub fn build(self) -> Result<DriverConfig, DriverError> {
        let ledger = self
            .ledger
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| DriverError::InvalidArgument("ledger name is required".into()))?;
        let transport = self
            .transport
            .ok_or_else(|| DriverError::InvalidArgument("a transport is required".into()))?;

        if self.read_ahead == 1 {
            return Err(DriverError::InvalidArgument(
                "readAhead must be 0 or >= 2, not 1".into(),
            ));
        }
        if self.pipeline_depth == 0 {
            return Err(DriverError::InvalidArgument(
                "pipeline depth must be at least 1".into(),
            ));
        }

        let max_concurrent_transactions = match self.max_concurrent_transactions {
            Some(0) => {
                return Err(DriverError::InvalidArgument(
                    "maxConcurrentTransactions must be >= 1".into(),
                ))
            }
            Some(n) => n,
            None => transport.default_max_concurrent(),
        };

        let retry_policy = self.retry_policy.unwrap_or_else(|| {
            RetryPolicy::new(3, Arc::new(EqualJitterBackoff::default()))
        });

        Ok(DriverConfig {
            ledger,
            transport,
            max_concurrent_transactions,
            retry_policy,
            read_ahead: self.read_ahead,
            pool_timeout: self.pool_timeout,
            session_open_timeout: self.session_open_timeout,
            value_codec: self.value_codec,
            user_agent_suffix: self.user_agent_suffix,
            pipeline_depth: self.pipeline_depth,
        })
    }
}
