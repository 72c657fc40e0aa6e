//! Exponential backoff with jitter for provider calls.
//!
//! Tasks scheduled on the same cron tick tend to fail together; the random
//! jitter spreads their retries out.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;

/// Retry behaviour for a single provider invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Fraction of the base delay used as the jitter amplitude
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Upper bound for any single delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay before retrying after the given (0-based) attempt, with random jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with_sample(attempt, sample)
    }

    /// Delay for a given attempt using an explicit jitter sample in `[-1, 1]`.
    ///
    /// `delay = min(initial * 2^attempt + initial * 2^attempt * jitter_factor * sample, max)`
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.initial_delay_ms as f64 * 2f64.powi(attempt.min(62) as i32);
        let jitter = base * self.jitter_factor * sample.clamp(-1.0, 1.0);
        let delay = (base + jitter).max(0.0).min(self.max_delay_ms as f64);
        Duration::from_millis(delay.round() as u64)
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// `op` receives the 0-based attempt number. Non-retryable errors are returned
/// immediately; after the last attempt the final error is returned unchanged.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let start = Instant::now();
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(
                        "{} succeeded after {} retries (total time: {:?})",
                        label,
                        attempt,
                        start.elapsed()
                    );
                }
                return Ok(value);
            }
            Err(error) => {
                if !error.is_retryable() {
                    tracing::error!("{} failed (non-retryable): {}", label, error);
                    return Err(error);
                }
                if attempt + 1 >= max_attempts {
                    tracing::error!(
                        "{} failed after {} attempts (total time: {:?}): {}",
                        label,
                        attempt + 1,
                        start.elapsed(),
                        error
                    );
                    return Err(error);
                }

                let mut delay = policy.delay_for_attempt(attempt);
                if let Some(retry_after) = error.retry_after {
                    delay = delay.max(retry_after).min(policy.max_delay());
                }

                tracing::warn!(
                    "{} attempt {} failed with {}, retrying in {:?}: {}",
                    label,
                    attempt + 1,
                    error.kind,
                    delay,
                    error.message
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.1,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_with_sample(0, 0.0), Duration::from_millis(1000));
        assert_eq!(policy.delay_with_sample(1, 0.0), Duration::from_millis(2000));
        assert_eq!(policy.delay_with_sample(2, 0.0), Duration::from_millis(4000));
        // Capped at max_delay
        assert_eq!(policy.delay_with_sample(10, 0.0), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_with_sample(1, 1.0), Duration::from_millis(2200));
        assert_eq!(policy.delay_with_sample(1, -1.0), Duration::from_millis(1800));

        for _ in 0..100 {
            let delay = policy.delay_for_attempt(1).as_millis();
            assert!((1800..=2200).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[tokio::test]
    async fn test_exhausts_attempts_on_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::new(ProviderErrorKind::RateLimit, "slow down")) }
        })
        .await;

        let error = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(error.kind, ProviderErrorKind::RateLimit);
    }

    #[tokio::test]
    async fn test_non_retryable_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(5), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::new(ProviderErrorKind::Auth, "bad key")) }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, ProviderErrorKind::Auth);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let result = retry_with_backoff(&fast_policy(3), "test", |attempt| async move {
            if attempt == 0 {
                Err(ProviderError::network("connection reset"))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
    }
}
