use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use super::error::{SyncError, TransportError};
use crate::config::SyncConfig;

/// How failed server calls are retried.
///
/// The first attempt is followed by at most `max_retries` retries. Retry
/// `n` (1-based) waits `delays[min(n, len) - 1]`, so the last delay repeats
/// once the table runs out.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delays: Vec<Duration>,
    /// Applied to each attempt separately.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retry_attempts,
            delays: config
                .retry_delays_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            timeout: config.timeout(),
        }
    }

    /// Delay before retry number `retry`, starting at 1.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if self.delays.is_empty() {
            return Duration::ZERO;
        }
        let index = (retry.max(1) as usize).min(self.delays.len()) - 1;
        self.delays[index]
    }

    pub fn should_retry(&self, retries_done: u32, error: &TransportError) -> bool {
        retries_done < self.max_retries && error.is_transient()
    }
}

/// Waits between retries. Swapped out in tests to record delays instead of
/// sleeping.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs `op` under the policy's per-attempt timeout, retrying transient
/// failures. Non-transient failures return immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    operation: &str,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut retries = 0u32;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(policy.timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(retries, &e) => {
                retries += 1;
                let delay = policy.delay_for(retries);
                tracing::warn!(
                    operation,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "sync request failed, retrying"
                );
                sleeper.sleep(delay).await;
            }
            Err(e) => return Err(SyncError::from_transport(e, retries + 1)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingSleeper;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            delays: [1_000, 2_000, 4_000, 8_000, 16_000, 60_000]
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_delay_table_repeats_last_entry() {
        let p = policy(10);
        assert_eq!(p.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(5), Duration::from_millis(16_000));
        assert_eq!(p.delay_for(6), Duration::from_millis(60_000));
        assert_eq!(p.delay_for(9), Duration::from_millis(60_000));
    }

    #[tokio::test]
    async fn test_exhausts_retries_with_backoff() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), SyncError> = with_retry(&policy(5), &sleeper, "push", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Network("connection refused".into()))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(sleeper.delays_ms(), vec![1_000, 2_000, 4_000, 8_000, 16_000]);
        match result {
            Err(SyncError::Transient { attempts, .. }) => assert_eq!(attempts, 6),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result = with_retry(&policy(5), &sleeper, "pull", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransportError::Http {
                    status: 503,
                    message: "busy".into(),
                })
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(sleeper.delays_ms(), vec![1_000, 2_000]);
    }

    #[tokio::test]
    async fn test_non_transient_fails_immediately() {
        let sleeper = RecordingSleeper::default();
        let result: Result<(), SyncError> = with_retry(&policy(5), &sleeper, "push", || async {
            Err(TransportError::Http {
                status: 422,
                message: "bad payload".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(SyncError::Rejected { status: 422, .. })));
        assert!(sleeper.delays_ms().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let sleeper = RecordingSleeper::default();
        let mut p = policy(1);
        p.timeout = Duration::from_millis(20);

        let result: Result<(), SyncError> = with_retry(&p, &sleeper, "pull", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(SyncError::Transient { attempts: 2, .. })));
        assert_eq!(sleeper.delays_ms(), vec![1_000]);
    }
}
