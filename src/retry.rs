//! Bounded retries and timeouts for backend calls.

use std::future::Future;
use std::time::Duration;

use docqa_core::{RagError, Result};
use tracing::warn;

/// Exponential backoff: `base * 2^(attempt-1)`, exponent capped at 5.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(60),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 1).min(5);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of
    /// attempts. Only errors with [`RagError::is_transient`] are retried.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        operation = what,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "transient failure, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Bound `fut` by `limit`, mapping expiry to [`RagError::Timeout`].
pub async fn with_timeout<T, Fut>(limit: Duration, what: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RagError::Timeout {
            what: what.to_string(),
            millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(6), Duration::from_millis(3200));
        assert_eq!(policy.delay_for(9), Duration::from_millis(3200));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = policy
            .run("test", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RagError::embedding_transient("fake", "503"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let err = policy
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RagError::embedding("fake", "401")) }
            })
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let err = policy
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RagError::chat_transient("fake", "429")) }
            })
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_error() {
        let err = with_timeout(Duration::from_millis(5), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, RagError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RagError::Timeout { millis: 5, .. }));
        assert_eq!(err.to_string(), "slow call timed out after 5ms");
    }
}
