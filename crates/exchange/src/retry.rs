//! Bounded exponential-backoff retry shared by every exchange call.

use std::{future::Future, time::Duration};

use common::config::RetrySettings;
use tracing::warn;

use crate::ExchangeError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay,
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error or
    /// runs out of attempts. The closure receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, ExchangeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = label,
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient exchange error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
