//! Retry/backoff policy for remote calls.

use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;

/// Backoff before the first retry.
pub const FIRST_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Backoff between subsequent retries.
pub const RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Retries transiently failing calls until a cumulative time window elapses.
///
/// A script-cache miss is retried exactly once immediately (the second call
/// re-registers the script); everything else follows the general schedule:
/// first backoff [`FIRST_RETRY_DELAY`], then [`RETRY_DELAY`] per attempt,
/// with the final sleep clamped so it does not overshoot the window.
/// Non-transient failures and the final attempt's failure propagate.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    window: Duration,
}

impl RetryPolicy {
    /// Create a policy with the given retry window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Run `op`, retrying per the policy.
    ///
    /// # Errors
    /// Returns the last failure once the window elapses, or the first
    /// non-transient failure immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let started = tokio::time::Instant::now();
        let mut delay = FIRST_RETRY_DELAY;
        loop {
            let attempt = match op().await {
                Err(err) if err.is_script_missing() => op().await,
                other => other,
            };
            let err = match attempt {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_transient() {
                return Err(err);
            }
            let elapsed = started.elapsed();
            if elapsed >= self.window {
                return Err(err);
            }
            let sleep_for = delay.min(self.window - elapsed);
            tracing::debug!(delay_ms = sleep_for.as_millis() as u64, "transient store failure, backing off");
            tokio::time::sleep(sleep_for).await;
            delay = RETRY_DELAY;
        }
    }
}
