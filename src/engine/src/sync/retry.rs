//! Fixed-delay retry with cancellation.

use std::future::Future;
use std::time::Duration;

use image_syncer_core::config::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use image_syncer_core::error::{Result, SyncError};
use tokio_util::sync::CancellationToken;

/// Retry settings: up to `max_retries` extra attempts, `delay` apart.
///
/// The delay is constant; there is no backoff or jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `operation` until it succeeds or attempts run out.
    ///
    /// `operation` receives the 1-based attempt number. Returns the last error
    /// when all attempts fail. Cancellation aborts both a running attempt and
    /// a pending delay and yields [`SyncError::Cancelled`]; a cancelled
    /// attempt is never retried.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        label: &str,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                result = operation(attempt) => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e,
            };

            if attempt > self.max_retries {
                return Err(err);
            }

            tracing::warn!(
                item = %label,
                attempt,
                max_attempts = self.max_attempts(),
                error = %err,
                retry_in = ?self.delay,
                "Attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
    }
}
