use std::{future::Future, time::Duration};

use tracing::warn;

use crate::{error::Result, metrics::TRANSIENT_RETRIES};

/// Exponential backoff with jitter for transient store failures. Any other
/// error is returned on the first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u8,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0u8;
        loop {
            match op().await {
                Err(err) if err.is_retryable() && retries < self.max_retries => {
                    retries += 1;
                    let delay = self.delay_for(retries);
                    warn!(operation, retries, ?delay, %err, "transient failure, retrying");
                    TRANSIENT_RETRIES.with_label_values(&[operation]).inc();
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    fn delay_for(&self, retry: u8) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let backoff = base_ms.saturating_mul(1 << (retry.saturating_sub(1).min(16)));
        // jitter keeps concurrent retries on the same hunt from lining up
        let jitter = if base_ms == 0 {
            0
        } else {
            rand::random_range(0..=base_ms / 2)
        };
        Duration::from_millis(backoff + jitter)
    }
}
