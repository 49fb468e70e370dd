use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::exchange::ExchangeError;

/// Retry policy for exchange calls.
///
/// Only transient failures (network, rate limit) are retried; a definitive
/// rejection surfaces immediately with no further attempts. Backoff doubles
/// per attempt: base, 2x base, 4x base.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Run `operation` until it succeeds, fails definitively, or transient
    /// attempts are exhausted. Returns the last error in the failure cases.
    pub async fn run<T, F, Fut>(&self, label: &str, operation: F) -> Result<T, ExchangeError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => {
                    warn!(%label, attempt, error = %e, "definitive failure, not retrying");
                    return Err(e);
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!(%label, attempts = attempt, error = %e, "retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.base_delay * 2u32.pow(attempt - 1);
                    warn!(%label, attempt, error = %e, delay_ms = delay.as_millis() as u64,
                        "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
