//! Bounded retry with exponential backoff for provider calls.
//!
//! Only errors for which [`VaultError::is_retryable`] is true (timeouts and
//! transient failures) are retried. Backoff doubles per attempt:
//! `base, 2×base, 4×base, …`, with the exponent capped at 5.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
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

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.saturating_sub(1).min(5))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// the retry budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        op = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderErrorKind, VaultError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        assert_eq!(p.delay_for(9), Duration::from_millis(3200));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out = fast(3)
            .run("op", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(VaultError::provider("p", ProviderErrorKind::Transient, "503"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = fast(2)
            .run("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(VaultError::provider("p", ProviderErrorKind::Timeout, "slow"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "provider_timeout");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejected_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = fast(5)
            .run("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(VaultError::provider("p", ProviderErrorKind::Rejected, "401"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "provider_error");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
