//! Backoff policy (C3): computes a retry delay from the attempt count and
//! last error. Grounded on `foundation/gax`'s `Backoff`/`ExponentialBackoff`
//! shape (capped exponential plus jitter), but using an equal-jitter formula
//! rather than gax's full-jitter one.

use std::time::Duration;

use rand::Rng;

use crate::error::DriverError;

/// Context passed to [`BackoffPolicy::calculate_delay`] for one retry
/// decision.
#[derive(Clone, Debug)]
pub struct RetryContext {
    /// Strictly increasing starting at 1 across the attempts of a single
    /// `Execute` call.
    pub attempt: u32,
    pub last_error: String,
    pub txn_id: Option<String>,
}

/// `calculateDelay(RetryContext) -> Duration`. A custom policy may return
/// any non-negative duration; implementations should normalize a
/// conceptually-null or negative delay to zero, which is automatic for
/// `Duration` (unsigned) but documented here for clarity.
pub trait BackoffPolicy: Send + Sync {
    fn calculate_delay(&self, ctx: &RetryContext) -> Duration;
}

/// Default backoff: equal-jitter exponential.
///
/// With `base` (default 10 ms) and `cap` (default 5 s) and
/// `n = min(attempt, 30)`: `exp = min(base * 2^n, cap)`,
/// `delay = exp/2 + rand[0, exp/2]`. The `n` clamp avoids `u64` overflow in
/// `2^n` for large attempt counts.
#[derive(Clone, Debug)]
pub struct EqualJitterBackoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for EqualJitterBackoff {
    fn default() -> Self {
        EqualJitterBackoff {
            base: Duration::from_millis(10),
            cap: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy for EqualJitterBackoff {
    fn calculate_delay(&self, ctx: &RetryContext) -> Duration {
        let n = ctx.attempt.min(30);
        let exp = self
            .base
            .checked_mul(1u32 << n)
            .filter(|d| *d < self.cap)
            .unwrap_or(self.cap);
        let half = exp / 2;
        let jitter_millis = if half.as_millis() == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half.as_millis() as u64)
        };
        half + Duration::from_millis(jitter_millis)
    }
}

/// Validates a caller-overridden policy's non-negative duration. Exposed
/// so `retry.rs`/`driver.rs` can normalize a policy's output in one place.
pub fn normalize(delay: Option<Duration>) -> Duration {
    delay.unwrap_or(Duration::ZERO)
}

pub fn validate_nonzero_cap(cap: Duration) -> Result<(), DriverError> {
    if cap.is_zero() {
        return Err(DriverError::InvalidArgument(
            "backoff cap must be greater than zero".into(),
        ));
    }
    Ok(())
}
