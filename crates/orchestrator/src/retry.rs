//! Exponential backoff for store writes.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use logwarden_core::config::OrchestratorConfig;

use crate::error::PersistenceError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            multiplier: 2,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            min_backoff: Duration::from_millis(config.persist_base_delay_ms),
            max_backoff: Duration::from_millis(
                config.persist_max_delay_ms.max(config.persist_base_delay_ms),
            ),
            multiplier: 2,
            max_attempts: config.persist_max_attempts.max(1),
        }
    }

    /// A single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1,
            max_attempts: 1,
        }
    }

    /// Delay before retry number `attempt + 1`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        let delay = self.min_backoff.saturating_mul(factor);
        delay.min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Returns the value together with the number of attempts used.
    /// Non-transient errors are returned immediately.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        mut op: F,
    ) -> Result<(T, u32), (PersistenceError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok((value, attempt)),
                Err(err) => {
                    if !err.is_transient() || attempt >= max_attempts {
                        return Err((err, attempt));
                    }

                    let delay = self.next_delay(attempt - 1);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "store write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn next_delay_starts_from_min_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(0), policy.min_backoff);
    }

    #[test]
    fn next_delay_grows_and_caps_at_max_backoff() {
        let policy = RetryPolicy {
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2,
            max_attempts: 5,
        };

        assert_eq!(policy.next_delay(1), Duration::from_millis(200));
        assert_eq!(policy.next_delay(2), Duration::from_millis(350));
        assert_eq!(policy.next_delay(40), Duration::from_millis(350));
    }

    #[test]
    fn from_config_never_allows_zero_attempts() {
        let config = OrchestratorConfig {
            playbooks_dir: "data/playbooks".into(),
            shards: 1,
            persist_max_attempts: 0,
            persist_base_delay_ms: 50,
            persist_max_delay_ms: 10,
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_backoff, Duration::from_millis(50));
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn run_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast(5)
            .run("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PersistenceError::Unavailable("down".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), (7, 3));
    }

    #[tokio::test]
    async fn run_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<((), u32), _> = fast(3)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(PersistenceError::Unavailable("down".into()))
            })
            .await;
        let (_, attempts) = result.unwrap_err();
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<((), u32), _> = fast(5)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let bad: Result<serde_json::Value, _> = serde_json::from_str("{");
                Err(PersistenceError::from(bad.unwrap_err()))
            })
            .await;
        let (err, attempts) = result.unwrap_err();
        assert!(matches!(err, PersistenceError::Serialization(_)));
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
