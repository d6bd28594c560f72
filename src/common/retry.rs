use std::{future::Future, time::Duration};

use tracing::warn;

use crate::{
    common::errors::{FailureClass, SourceResult, classify},
    configs::RetryConfig,
};

/// Exponential backoff capped at `max`.
pub struct Backoff {
    attempt: u32,
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            attempt: 0,
            base,
            max,
        }
    }

    pub fn next(&mut self) -> Duration {
        self.attempt += 1;
        let factor = 2u32.saturating_pow((self.attempt - 1).min(16));
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// `None` keeps retrying transient failures until one succeeds.
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay, self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Runs `op` again for as long as it fails with a transient error.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> SourceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SourceResult<T>>,
{
    let mut backoff = policy.backoff();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if classify(&e) == FailureClass::Transient => {
                let delay = backoff.next();
                if policy
                    .max_attempts
                    .is_some_and(|max| backoff.attempt() >= max)
                {
                    return Err(e);
                }
                warn!(
                    "{} failed (attempt {}), retrying in {:?}: {}",
                    label,
                    backoff.attempt(),
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::common::errors::SourceError;

    fn server_error() -> SourceError {
        SourceError::ServerError {
            status: 503,
            url: "https://example.com".into(),
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.next(), Duration::from_millis(100));
        assert_eq!(backoff.next(), Duration::from_millis(200));
        assert_eq!(backoff.next(), Duration::from_millis(400));
        assert_eq!(backoff.next(), Duration::from_millis(500));
        assert_eq!(backoff.next(), Duration::from_millis(500));
        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result = retry_transient(&policy, "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(server_error())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: SourceResult<()> = retry_transient(&RetryPolicy::default(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::shape("marker", "https://example.com"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_bound() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: Some(3),
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
        };
        let result: SourceResult<()> = retry_transient(&policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(server_error())
        })
        .await;

        assert!(matches!(result, Err(SourceError::ServerError { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
