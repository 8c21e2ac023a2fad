//! Retry Executor
//!
//! Bounded retries with exponential backoff for remote and database calls.
//! The caller decides which errors are worth retrying; anything classified as
//! permanent returns immediately.

use cmig_common::config::Settings;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Upper bound for a single backoff sleep
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Attempt budget and backoff shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    /// Delay after the first failure; doubles per attempt
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: MAX_BACKOFF,
        }
    }

    /// Policy from `MAX_RETRIES` / `RETRY_DELAY_MS`
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.max_retries,
            Duration::from_millis(settings.retry_delay_ms),
        )
    }

    /// Single attempt, no backoff
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Sleep before attempt `attempt + 1`, given `attempt` failures so far
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// Run `operation` until it succeeds, fails permanently, or the budget runs out
///
/// `is_transient` classifies each error; `false` returns that error at once.
/// When every attempt fails the last error is returned.
pub async fn with_retry<T, E, F, Fut, C>(
    context: &str,
    policy: &RetryPolicy,
    is_transient: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = context,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_transient(&err) {
                    tracing::debug!(operation = context, attempt, error = %err, "Permanent failure, not retrying");
                    return Err(err);
                }

                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        operation = context,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Giving up after {} attempts",
                        attempt
                    );
                    return Err(err);
                }

                let backoff = policy.delay_after(attempt);
                tracing::warn!(
                    operation = context,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}
