//! Retry of transient store failures at the Producer/Worker boundary.

use std::future::Future;
use std::time::Duration;

use crate::domain::StoreError;
use crate::queue::RetryPolicy;

/// How often, and how patiently, an unavailable store is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRetry {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub policy: RetryPolicy,
}

impl Default for StoreRetry {
    fn default() -> Self {
        Self::new(5)
    }
}

impl StoreRetry {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            policy: RetryPolicy::exponential(Duration::from_millis(50), Duration::from_secs(2))
                .with_jitter(0.2),
        }
    }

    /// A single attempt; store errors surface right away.
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Run `op`, retrying only `StoreError::Unavailable`.
    pub async fn run<T, F, Fut>(&self, op_name: &'static str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_transient() && attempt < self.attempts => {
                    let delay = self.policy.backoff(attempt - 1);
                    tracing::warn!(
                        op = op_name,
                        attempt,
                        ?delay,
                        error = %err,
                        "store unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = StoreRetry::new(3)
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Unavailable("down".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = StoreRetry::new(2)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Unavailable("down".into()))
            })
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let id = crate::domain::TaskId::from_ulid(ulid::Ulid::new());
        let result: Result<(), _> = StoreRetry::new(5)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::DuplicateId(id))
            })
            .await;

        assert_eq!(result, Err(StoreError::DuplicateId(id)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
