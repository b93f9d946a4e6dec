//! Bounded exponential retry applied beneath individual network calls.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::{BackupRestoreError, Result};

/// Retry budget for one network call: fixed base delay, exponential backoff,
/// bounded attempt count. Timeouts and whole-operation retries remain the
/// caller's responsibility.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: usize,
    /// Delay before the second attempt; doubles after each failure.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Runs `operation` until it succeeds or the attempt budget is spent.
    /// The final error surfaces as [`BackupRestoreError::Storage`] carrying
    /// `context` and the last failure.
    pub(crate) async fn run<F, Fut, T, E>(&self, context: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.base_delay;
        for attempt in 1..=attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(source) if attempt == attempts => {
                    error!(context, attempt, error = %source, "retry budget exhausted");
                    return Err(BackupRestoreError::Storage(format!(
                        "{context} failed after {attempt} attempts: {source}"
                    )));
                }
                Err(source) => {
                    warn!(context, attempt, delay_ms = delay.as_millis() as u64, error = %source, "retrying storage call");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.max_delay);
                }
            }
        }
        unreachable!("max_attempts is at least 1")
    }
}
