//! Bounded retry with backoff around external calls

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::{BackoffKind, RetryConfig};
use crate::error::{Error, Result};

/// Retry policy for inference calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: BackoffKind,
    /// Limit on a single attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Exponential policy with no per-attempt timeout
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff: BackoffKind::Exponential,
            attempt_timeout: None,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
            .with_backoff(config.backoff)
            .with_attempt_timeout(Duration::from_secs(config.attempt_timeout_secs))
    }

    pub fn with_backoff(mut self, backoff: BackoffKind) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            BackoffKind::Linear => self.base_delay.saturating_mul(attempt),
            BackoffKind::Exponential => {
                let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or runs out of attempts. The last error is returned on exhaustion.
    pub async fn invoke<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::Timeout(format!(
                        "attempt {} exceeded {:?}",
                        attempt, limit
                    ))),
                },
                None => operation().await,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            tracing::warn!(
                error = %err,
                "Request failed (attempt {}/{}), retrying in {:?}",
                attempt,
                self.max_attempts,
                delay
            );
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_delays() {
        let base = Duration::from_millis(100);
        let exp = RetryPolicy::new(5, base);
        assert_eq!(exp.delay_for(1), base);
        assert_eq!(exp.delay_for(2), base * 2);
        assert_eq!(exp.delay_for(3), base * 4);

        let linear = exp.with_backoff(BackoffKind::Linear);
        assert_eq!(linear.delay_for(3), base * 3);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .invoke(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= 2 {
                    Err(Error::inference("throttled"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(3)
            .invoke(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(Error::inference(format!("failure {}", n)))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::Inference(message)) => assert_eq!(message, "failure 3"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(5)
            .invoke(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::storage("denied"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_failure() {
        let calls = AtomicU32::new(0);
        let result = policy(2)
            .with_attempt_timeout(Duration::from_millis(10))
            .invoke(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    sleep(Duration::from_secs(5)).await;
                }
                Ok(n)
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }
}
