//! Bounded retry with exponential backoff for store calls.
//!
//! Optimistic-concurrency conflicts are expected under load: the document a caller
//! read changed before its write landed. [`RetryPolicy`] absorbs them by re-running
//! the whole read-decide-write step after a growing delay, and gives up after a
//! fixed number of attempts.
//!
//! The delay before retry `n` (1-based) is `base_delay × 2^(n-1)`, capped at
//! `max_delay`:
//!
//! ```rust
//! use std::time::Duration;
//! use carpool_engine::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::new(4, Duration::from_millis(100), Duration::from_millis(300));
//! assert_eq!(policy.delay_for(1), Duration::from_millis(100));
//! assert_eq!(policy.delay_for(2), Duration::from_millis(200));
//! assert_eq!(policy.delay_for(3), Duration::from_millis(300));
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::PoolingMetrics;

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(150);

/// Default cap on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

/// Decides which store errors are worth another attempt.
pub type Retryable = fn(&carpool_core::Error) -> bool;

/// Retry policy shared by the allocator, dropoff and the reassignment sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// A policy that tries exactly once.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only store errors accepted by `retryable` are retried; everything else is
    /// returned as soon as it happens.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or [`Error::RetriesExhausted`]
    /// carrying the last store error.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        retryable: Retryable,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(Error::Core(err)) if retryable(&err) => {
                    if attempt >= attempts {
                        tracing::warn!(
                            operation,
                            attempts,
                            error = %err,
                            "giving up after transient store failures"
                        );
                        return Err(Error::RetriesExhausted {
                            operation,
                            attempts,
                            source: err,
                        });
                    }

                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying after transient store failure"
                    );
                    PoolingMetrics::new().record_retry(operation);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
