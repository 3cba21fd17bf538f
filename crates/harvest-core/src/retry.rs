//! Bounded retry with exponential backoff, and a deadline wrapper.
//!
//! Both are plain async functions over a closure/future so they compose with
//! each other and with [`CircuitBreaker::call`](crate::circuit_breaker::CircuitBreaker::call)
//! in any order.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::AppError;

/// Exponential part of the backoff is capped here so large attempt numbers
/// cannot overflow a `Duration`.
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// How many times to retry and how long to wait in between.
///
/// The delay before retry `k` (1-based) is `base_delay * 2^(k-1)` plus a
/// uniform jitter in `[0, 1)` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Deterministic part of the delay before retry `attempt` (1-based).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.saturating_sub(1).min(63) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    /// Full delay before retry `attempt`: backoff plus jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        self.backoff_for_attempt(attempt) + Duration::from_secs_f64(jitter)
    }
}

/// Run `operation`, retrying retryable failures up to `policy.max_retries`
/// extra times. The last error is returned once retries are exhausted;
/// non-retryable errors are returned immediately.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && e.is_retryable() => {
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > 0 {
                    tracing::error!(
                        attempts = attempt + 1,
                        error = %e,
                        "Giving up after {} retries",
                        attempt
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Abandon `operation` if it has not finished within `duration`.
///
/// The future is dropped at its next suspension point, which is how tokio
/// cancels work; concurrent callers each get their own deadline.
pub async fn with_timeout<T, Fut>(duration: Duration, operation: Fut) -> Result<T, AppError>
where
    Fut: Future<Output = Result<T, AppError>>,
{
    tokio::time::timeout(duration, operation)
        .await
        .map_err(|_| AppError::Timeout(duration))?
}
