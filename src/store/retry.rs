//! Backoff for document store calls that race the store's own propagation.
//!
//! A freshly copied workbook is not immediately visible to every API: setting
//! its permissions or listing its tables can fail for a few seconds after the
//! copy returns. Those calls go through [`retry_with_backoff`], which retries
//! transient errors with doubling delays and gives up at once on permanent
//! ones.
//!
//! The request path does not retry; a failed call there surfaces as a
//! transient reply and the platform's own redelivery takes over.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::{StoreError, StoreErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay after the first failure; doubled after each further one.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    /// 500ms, 1s, 2s, 4s, 4s: about eleven seconds of grace for a new copy.
    pub const PROPAGATION: Self = Self {
        attempts: 6,
        base_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(4),
    };

    /// Retries without sleeping.
    pub const IMMEDIATE: Self = Self {
        attempts: 4,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    /// Delay before retry number `retry` (0-indexed).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::PROPAGATION
    }
}

/// Runs `operation` until it succeeds, fails permanently, or runs out of
/// attempts. The last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(config: RetryConfig, mut operation: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = config.attempts.max(1);
    let mut retry = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if err.kind == StoreErrorKind::Permanent {
            return Err(err);
        }
        if retry + 1 >= attempts {
            warn!(attempts, error = %err, "Store call still failing, giving up");
            return Err(err);
        }

        let delay = config.delay(retry);
        debug!(retry, delay_ms = delay.as_millis() as u64, error = %err, "Retrying transient store error");
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}
