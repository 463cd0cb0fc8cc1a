//! Retry with exponential backoff for transient API failures.
//!
//! Jira Cloud answers bursts with HTTP 429 and a `Retry-After` header; the
//! gateway occasionally returns 5xx. Both are worth a few more attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{ApiError, Result};

/// How failed requests are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    pub exponential_base: f64,
    /// Randomize each delay to between half and one and a half times its value.
    pub jitter: bool,
    /// HTTP statuses that are retried.
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter: true,
            retryable_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// A config that never retries.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay before retrying after the given zero-based attempt.
    ///
    /// A server-provided `Retry-After` wins over the computed backoff; both
    /// are capped at `max_delay_ms`.
    pub fn calculate_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(retry_after) = retry_after {
            return retry_after.min(self.max_delay());
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = (self.base_delay_ms as f64 * self.exponential_base.powi(exponent))
            .min(self.max_delay_ms as f64);

        let delay_ms = if self.jitter {
            delay_ms * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// Whether this status is in the retryable set.
    pub fn retries_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Whether an error is transient under this config.
    pub fn should_retry(&self, error: &ApiError) -> bool {
        match error {
            ApiError::RateLimited { .. } => self.retries_status(429),
            ApiError::ServerError { status, .. } | ApiError::Status { status, .. } => {
                self.retries_status(*status)
            }
            ApiError::Network(e) => e.is_connect() || e.is_timeout(),
            ApiError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Passed to the retry callback before each sleep.
#[derive(Debug)]
pub struct RetryEvent<'a> {
    /// The attempt that just failed, starting at 1.
    pub attempt: u32,
    pub error: &'a ApiError,
    pub delay: Duration,
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// The operation receives the one-based attempt number.
pub async fn retry<T, F, Fut>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_notify(config, operation, |_| {}).await
}

/// Like [`retry`], calling `on_retry` before every backoff sleep.
pub async fn retry_notify<T, F, Fut, N>(
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: N,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    N: FnMut(&RetryEvent<'_>),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!("Request attempt {}/{}", attempt, max_attempts);

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts && config.should_retry(&error) => {
                let delay = config.calculate_delay(attempt - 1, error.retry_after());
                warn!(
                    "Request failed (attempt {}), retrying in {}ms: {}",
                    attempt,
                    delay.as_millis(),
                    error
                );
                on_retry(&RetryEvent {
                    attempt,
                    error: &error,
                    delay,
                });
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                if attempt > 1 {
                    warn!("Giving up after {} attempts: {}", attempt, error);
                }
                return Err(error);
            }
        }
    }
}
