//! Exponential backoff for transient transport failures.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::FetchConfig;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl From<&FetchConfig> for RetryConfig {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_millis),
            max_delay: Duration::from_millis(config.max_delay_millis),
        }
    }
}

pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

/// Only transport-level failures are transient. A response that arrived, whatever
/// its status, is never an error here.
impl RetryableError for reqwest::Error {
    fn is_retryable(&self) -> bool {
        self.is_timeout() || self.is_connect() || self.is_request() || self.is_body()
    }
}

/// Delay before the retry that follows `attempt` (zero-based). Doubles each
/// time and saturates at `max_delay`, so the sequence never decreases.
pub(crate) fn calculate_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    cfg.base_delay
        .checked_mul(factor)
        .unwrap_or(cfg.max_delay)
        .min(cfg.max_delay)
}

pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Debug,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempt += 1;

                if !err.is_retryable() {
                    return Err(err);
                }

                if attempt >= cfg.max_attempts {
                    warn!(
                        error = ?err,
                        attempt = attempt,
                        max_attempts = cfg.max_attempts,
                        "max retry attempts exhausted"
                    );
                    return Err(err);
                }

                let delay = calculate_delay(cfg, attempt - 1);
                warn!(
                    error = ?err,
                    attempt = attempt,
                    max_attempts = cfg.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient error"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct MockError {
        retryable: bool,
    }

    impl RetryableError for MockError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(1000),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<(), MockError> = retry(&fast_config(5), || {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(MockError { retryable: false })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_attempted_max_times_with_growing_delays() {
        let started = Arc::new(Mutex::new(Vec::new()));

        let result: Result<(), MockError> = retry(&fast_config(4), || {
            let started = Arc::clone(&started);
            async move {
                started.lock().push(tokio::time::Instant::now());
                Err(MockError { retryable: true })
            }
        })
        .await;

        assert!(result.is_err());

        let started = started.lock();
        assert_eq!(started.len(), 4);

        let gaps: Vec<Duration> = started.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|w| w[1] >= w[0]), "gaps: {:?}", gaps);
        assert!(gaps[0] >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_succeeds_after_retries() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<&str, MockError> = retry(&fast_config(5), || {
            let attempts = Arc::clone(&attempts);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(MockError { retryable: true })
                } else {
                    Ok("up")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "up");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_doubles_and_saturates() {
        let cfg = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };

        assert_eq!(calculate_delay(&cfg, 0), Duration::from_millis(100));
        assert_eq!(calculate_delay(&cfg, 1), Duration::from_millis(200));
        assert_eq!(calculate_delay(&cfg, 2), Duration::from_millis(400));
        assert_eq!(calculate_delay(&cfg, 4), Duration::from_millis(1000));
        assert_eq!(calculate_delay(&cfg, 40), Duration::from_millis(1000));
    }
}
