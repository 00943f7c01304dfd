use crate::{
    error::Result,
    observe::{AuthEvent, AuthObserver},
};
use rand::Rng;
use std::future::Future;
use tokio::time::{Duration, sleep};
use tracing::warn;

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Bounded exponential backoff for transient failures.
///
/// `retries` counts the attempts made after the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based), before jitter.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jittered_delay(&self, retry: u32) -> Duration {
        let delay = self.delay(retry);
        if delay.is_zero() {
            return delay;
        }
        delay.mul_f64(rand::thread_rng().gen_range(0.8..=1.0))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retries are used up.
    ///
    /// # Errors
    /// Returns the last error produced by `op`.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        observer: &dyn AuthObserver,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry < self.retries => {
                    retry += 1;
                    let delay = self.jittered_delay(retry);
                    warn!("{} failed: {}", operation, e);
                    observer.on_event(&AuthEvent::Retrying {
                        operation,
                        attempt: retry + 1,
                        delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    });
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Error, observe::tests::Recorder};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
        assert_eq!(policy.delay(4), Duration::from_millis(4000));
        assert_eq!(policy.delay(5), Duration::from_secs(5));
        assert_eq!(policy.delay(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_three_network_errors_then_success() {
        let calls = AtomicU32::new(0);
        let recorder = Recorder::default();
        let result = fast()
            .run("fetch", &recorder, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(Error::Network("connection reset".into()))
                } else {
                    Ok("assertion")
                }
            })
            .await;

        assert_eq!(result.ok(), Some("assertion"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(recorder.events.lock().map(|e| e.len()).unwrap_or(0), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast()
            .run("fetch", &Recorder::default(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Network("timeout".into()))
            })
            .await;

        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast()
            .run("exchange", &Recorder::default(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::ExchangeRejected("bad audience".into()))
            })
            .await;

        assert!(matches!(result, Err(Error::ExchangeRejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
