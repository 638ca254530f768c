//! Exponential backoff with full jitter: `delay = min(cap, base * 2^attempt) * rand(0, 1)`.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("max attempts ({0}) exhausted")]
    MaxAttemptsExhausted(u32),
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

/// Full-jitter backoff delay for a given (zero-indexed) retry attempt.
pub fn backoff_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.base.as_millis().saturating_mul(1u128 << attempt.min(32));
    let capped = exp.min(config.cap.as_millis());
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

pub async fn with_retry<F, Fut, T, E>(config: RetryConfig, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt + 1 >= config.max_attempts {
                    warn!(attempt, "retry attempts exhausted: {}", e);
                    return Err(RetryError::MaxAttemptsExhausted(config.max_attempts));
                }
                let delay = backoff_for_attempt(&config, attempt);
                warn!(attempt, ?delay, "retrying after failure: {}", e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_sleeping() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result = with_retry(RetryConfig::default(), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let config = RetryConfig {
            max_attempts: 5,
            base: Duration::from_millis(5),
            cap: Duration::from_millis(50),
        };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result = with_retry(config, move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let config = RetryConfig {
            max_attempts: 3,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
        };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result = with_retry(config, move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>("persistent") }
        })
        .await;
        assert!(matches!(result, Err(RetryError::MaxAttemptsExhausted(3))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_never_exceeds_cap() {
        let config = RetryConfig {
            max_attempts: 8,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        };
        for attempt in 0..8 {
            let d = backoff_for_attempt(&config, attempt);
            assert!(d <= config.cap);
        }
    }
}
