//! Exponential backoff for transient GitHub API failures.
//!
//! Status publication is retried a bounded number of times; a delivery never
//! loops forever on a broken API. Permanent errors are returned immediately.

use std::future::Future;
use std::time::Duration;

use super::error::{GitHubApiError, GitHubErrorKind};

/// Backoff schedule for retrying transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Retry attempts after the initial one.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap on the exponential growth.
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// 3 retries at 2s, 4s, 8s; about 14 seconds of waiting in total.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
        backoff_multiplier: 2.0,
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Delay before retry `attempt` (0-indexed), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Runs an async operation, retrying transient failures per the schedule.
///
/// Returns the last error once retries are exhausted, or the first permanent
/// error immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    mut operation: F,
) -> Result<T, GitHubApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GitHubApiError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.kind == GitHubErrorKind::Permanent => return Err(e),
            Err(e) => {
                if attempt >= config.max_retries {
                    return Err(e);
                }
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient GitHub API failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
