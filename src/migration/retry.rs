use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::config::TransferConfig;
use crate::constants::{MAX_TRANSFER_ATTEMPTS, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS};
use crate::error::StageResult;

/// Bounded exponential backoff for retryable transfer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: MAX_TRANSFER_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(transfer: &TransferConfig) -> Self {
        RetryPolicy {
            max_attempts: transfer.max_attempts.max(1),
            base_delay: Duration::from_millis(transfer.retry_base_delay_ms),
            max_delay: Duration::from_millis(transfer.retry_max_delay_ms),
        }
    }

    /// Policy without sleeps, for tests.
    pub fn immediate(max_attempts: usize) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retrying after the given (zero-based) failed attempt.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is exhausted.
    ///
    /// # Arguments
    ///
    /// * `what` - Label for log lines, usually the object key
    /// * `operation` - Called once per attempt with the zero-based attempt number
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> StageResult<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = StageResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                        attempt + 1,
                        self.max_attempts,
                        what,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
