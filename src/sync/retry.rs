use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::SyncError;

/// Bounded exponential backoff around a single external call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Fraction of the delay randomized either way (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no sleeping.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0 for the first retry).
    ///
    /// `sample` is a uniform draw in `[0, 1)`; 0.5 means no jitter.
    pub fn delay_for(&self, retry: u32, sample: f64) -> Duration {
        let base = self.base_delay.as_secs_f64() * self.backoff_factor.powi(retry as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = capped * self.jitter.clamp(0.0, 1.0) * (sample - 0.5) * 2.0;
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }

    pub fn should_retry(&self, attempt: u32, error: &SyncError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned as is.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(attempt, &e) => {
                    let delay = self.delay_for(attempt - 1, rand::random::<f64>());
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
