//! Bounded retry with exponential backoff for chain reads.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry schedule: `attempts` tries in total, sleeping `base_delay * 2^n`
/// after the n-th failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Single attempt, no sleeping.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before retry number `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2_u32.saturating_pow(attempt))
    }

    /// Runs `op` until it succeeds or the attempts are used up, returning the
    /// last error.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt + 1 < self.attempts => {
                    let backoff = self.delay_for(attempt);
                    tracing::debug!(
                        what,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "retrying failed read"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
