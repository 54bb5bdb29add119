//! Retry and timeout handling around a generator

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result, is_retryable_error};
use crate::generator::{Generator, SharedGenerator};
use crate::types::GenerateRequest;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Wraps a generator with a per-call deadline and retry on transient errors
pub struct ResilientGenerator {
    inner: SharedGenerator,
    retry: RetryConfig,
    timeout: Duration,
}

impl ResilientGenerator {
    /// Wrap a generator with default retry settings and a 60 second deadline
    pub fn new(inner: SharedGenerator) -> Self {
        Self {
            inner,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-attempt deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Generator for ResilientGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, self.inner.generate(request)).await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(self.timeout)),
            };

            match outcome {
                Ok(text) => return Ok(text),
                Err(e) => {
                    // Typed check first, string fallback for wrapped errors
                    let error_msg = e.to_string();
                    let retryable = e.is_retryable() || is_retryable_error(&error_msg);

                    if attempt < self.retry.max_retries && retryable {
                        let delay = self.retry.delay_for_attempt(attempt);
                        tracing::warn!(
                            "Generation via {} failed (attempt {}/{}): {}. Retrying in {:?}...",
                            self.inner.name(),
                            attempt + 1,
                            self.retry.max_retries + 1,
                            error_msg,
                            delay
                        );
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyGenerator {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> Error,
    }

    #[async_trait]
    impl Generator for FlakyGenerator {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, _request: &GenerateRequest) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err((self.error)())
            } else {
                Ok("ok".to_string())
            }
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl Generator for SlowGenerator {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _request: &GenerateRequest) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("late".to_string())
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_for_attempt_caps_at_max() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let inner = Arc::new(FlakyGenerator {
            failures: 2,
            calls: AtomicU32::new(0),
            error: || Error::RateLimited { retry_after: None },
        });
        let generator = ResilientGenerator::new(inner.clone()).with_retry_config(fast_retry());

        let text = generator.generate(&GenerateRequest::new("hi")).await.unwrap();
        assert_eq!(text, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let inner = Arc::new(FlakyGenerator {
            failures: 5,
            calls: AtomicU32::new(0),
            error: || Error::InvalidApiKey,
        });
        let generator = ResilientGenerator::new(inner.clone()).with_retry_config(fast_retry());

        let err = generator.generate(&GenerateRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidApiKey));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported_after_retries() {
        let generator = ResilientGenerator::new(Arc::new(SlowGenerator))
            .with_retry_config(fast_retry())
            .with_timeout(Duration::from_millis(50));

        let err = generator.generate(&GenerateRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
