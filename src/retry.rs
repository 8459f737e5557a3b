//! Bounded exponential backoff for transient infrastructure failures

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryConfig;

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), with full jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_backoff_ms
            .saturating_mul(u64::from(self.base_for_backoff).saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_backoff_ms);
        if capped == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(capped / 2..=capped))
    }
}

/// Run `op` until it succeeds or the retry budget is spent
///
/// Returns the last error once `max_retries` retries have failed.
pub async fn with_backoff<T, E, F, Fut>(policy: &RetryConfig, what: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                warn!("{what} failed (attempt {attempt}/{}): {e}; retrying in {delay:?}", policy.max_retries);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
