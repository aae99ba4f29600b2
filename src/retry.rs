//! Retry policy (C4): max attempts plus a backoff policy. Grounded on
//! `spanner/src/retry.rs`'s `TransactionRetrySetting` pairing a strategy
//! with a condition, simplified to this driver's single retryable/fatal
//! classification table.

use std::sync::Arc;

use crate::backoff::{BackoffPolicy, EqualJitterBackoff};

/// `{ maxRetries: int>=0, backoff: BackoffPolicy }`. A policy with
/// `max_retries == 0` disables retry entirely.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Arc<dyn BackoffPolicy>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Arc<dyn BackoffPolicy>) -> Self {
        RetryPolicy {
            max_retries,
            backoff,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> &Arc<dyn BackoffPolicy> {
        &self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            backoff: Arc::new(EqualJitterBackoff::default()),
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_max_retries_disables_retry() {
        let policy = RetryPolicy::new(0, Arc::new(EqualJitterBackoff::default()));
        assert_eq!(policy.max_retries(), 0);
    }
}
