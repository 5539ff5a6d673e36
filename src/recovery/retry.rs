//! Exponential backoff around any async operation.

use super::classify::classify_error;
use crate::error::{Result, SyncError};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt, so `max_retries + 1` attempts in total.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Time limit for each individual attempt.
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            timeout: Duration::from_millis(10_000),
        }
    }
}

impl RetryConfig {
    /// Delay slept after a failed `attempt` (0-based):
    /// `min(base_delay * multiplier^attempt, max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else if secs < 0.0 {
            self.base_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// attempts run out.
///
/// Each attempt races the operation against `config.timeout`; an elapsed
/// attempt counts as a retryable [`SyncError::Timeout`].
pub async fn retry_with_backoff<T, E, F, Fut>(mut operation: F, config: &RetryConfig) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<SyncError>,
{
    let mut attempt: u32 = 0;
    loop {
        let outcome = match tokio::time::timeout(config.timeout, operation()).await {
            Ok(Ok(value)) => {
                if attempt > 0 {
                    tracing::info!("[RETRY] succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Ok(Err(e)) => e.into(),
            Err(_elapsed) => SyncError::Timeout {
                after_ms: u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
            },
        };

        let classification = classify_error(&outcome);
        if !classification.retryable {
            tracing::warn!(
                "[RETRY] non-retryable {} error on attempt {}: {}",
                classification.kind,
                attempt,
                outcome
            );
            return Err(outcome);
        }

        if attempt >= config.max_retries {
            tracing::warn!(
                "[RETRY] giving up after {} attempts: {}",
                attempt + 1,
                outcome
            );
            return Err(outcome);
        }

        let delay = config.delay_for_attempt(attempt);
        tracing::debug!(
            "[RETRY] attempt {} failed ({}), retrying in {}ms",
            attempt,
            classification.kind,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
