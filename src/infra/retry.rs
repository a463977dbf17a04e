//! Retry combinator with exponential backoff and jitter.
//!
//! ACL-row creation, default-permission bootstrap and parent linking are
//! expected to race under concurrent resource creation. Those operations run
//! through [`Retry::run_with_predicate`] with the predicate tied to
//! [`AuthzError::is_retryable`](crate::infra::AuthzError::is_retryable);
//! everything else fails fast.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt)
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0) to spread out concurrent retries
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::acl_bootstrap()
    }
}

impl RetryConfig {
    /// Config for ACL creation and bootstrap races: 3 attempts total,
    /// 500ms base delay tripling each time.
    pub fn acl_bootstrap() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 3.0,
            jitter: 0.3,
        }
    }

    /// Fast config for tests.
    pub fn fast() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Calculate delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter > 0.0 {
            let jitter_range = capped * self.jitter;
            let mut rng = rand::thread_rng();
            let offset = rng.gen_range(-jitter_range..=jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The final result (success or last error)
    pub result: Result<T, E>,
    /// Number of attempts made (1 = succeeded on first try)
    pub attempts: u32,
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Retry executor.
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run an operation, retrying only while `should_retry` approves the
    /// error and attempts remain. Non-retryable errors propagate immediately.
    pub async fn run_with_predicate<F, Fut, T, E, P>(
        &self,
        context: &str,
        operation: F,
        should_retry: P,
    ) -> RetryResult<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(context, attempts, "operation succeeded after retries");
                    }
                    return RetryResult {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(e) => {
                    if attempts > self.config.max_retries || !should_retry(&e) {
                        if attempts > 1 {
                            tracing::warn!(
                                context,
                                attempts,
                                error = %e,
                                "operation failed after retries exhausted"
                            );
                        }
                        return RetryResult {
                            result: Err(e),
                            attempts,
                        };
                    }

                    let delay = self.config.delay_for_attempt(attempts - 1);
                    tracing::debug!(
                        context,
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "operation failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delay_calculation() {
        let config = RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 3.0,
            jitter: 0.0,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1500));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(4500));
        // capped
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let retry = Retry::new(RetryConfig::fast());
        let result = retry
            .run_with_predicate("test", || async { Ok::<_, &str>(7) }, |_| true)
            .await;
        assert!(result.is_success());
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let count = Arc::new(AtomicU32::new(0));
        let retry = Retry::new(RetryConfig::fast());

        let c = count.clone();
        let result = retry
            .run_with_predicate(
                "test",
                || {
                    let c = c.clone();
                    async move {
                        if c.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err("race")
                        } else {
                            Ok(1)
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_fast() {
        let count = Arc::new(AtomicU32::new(0));
        let retry = Retry::new(RetryConfig::fast().with_max_retries(5));

        let c = count.clone();
        let result: RetryResult<(), &str> = retry
            .run_with_predicate(
                "test",
                || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err("fatal")
                    }
                },
                |e| *e != "fatal",
            )
            .await;

        assert!(!result.is_success());
        assert_eq!(result.attempts, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_retries() {
        let retry = Retry::new(RetryConfig::fast());
        let result = retry
            .run_with_predicate("test", || async { Err::<(), _>("race") }, |_| true)
            .await;
        assert!(!result.is_success());
        assert_eq!(result.attempts, 3); // initial + 2 retries
    }
}
