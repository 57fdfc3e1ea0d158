//! Bounded exponential backoff
//!
//! Retry state is an explicit value ([`Backoff`]) that counts attempts and
//! answers each failure with a typed [`RetryDecision`]. [`retry_async`]
//! drives a fallible async operation with it.

use crate::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Nominal delay before retry number `retry` (1-based), without jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * exp)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempts: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp { attempts: u32 },
}

/// Attempt counter for one operation
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
}

impl Backoff {
    /// Failed attempts so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// Records a failed attempt and decides whether to try again
    pub fn on_failure(&mut self) -> RetryDecision {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                attempts: self.attempts,
            };
        }

        let nominal = self.policy.delay_for(self.attempts);
        let delay = if self.policy.jitter && !nominal.is_zero() {
            nominal.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            nominal
        };
        RetryDecision::RetryAfter(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Why [`retry_async`] stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The operation returned an error classified as permanent
    Permanent(E),
    /// Every attempt failed transiently
    Exhausted { attempts: u32, last_error: E },
}

/// Runs `operation` until it succeeds, fails permanently, or the policy's
/// attempt budget is spent. Returns the value and the number of attempts used.
pub async fn retry_async<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_transient: C,
    mut operation: F,
) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut backoff = policy.backoff();

    loop {
        match operation().await {
            Ok(value) => return Ok((value, backoff.attempts() + 1)),
            Err(e) if !is_transient(&e) => return Err(RetryError::Permanent(e)),
            Err(e) => match backoff.on_failure() {
                RetryDecision::GiveUp { attempts } => {
                    return Err(RetryError::Exhausted {
                        attempts,
                        last_error: e,
                    })
                }
                RetryDecision::RetryAfter(delay) => {
                    crate::log_retry_attempt!(
                        operation_name,
                        backoff.attempts() + 1,
                        backoff.max_attempts(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        assert_eq!(p.delay_for(4), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_gives_up_after_max_attempts() {
        let mut backoff = policy(3).backoff();
        assert!(matches!(backoff.on_failure(), RetryDecision::RetryAfter(_)));
        assert!(matches!(backoff.on_failure(), RetryDecision::RetryAfter(_)));
        assert_eq!(
            backoff.on_failure(),
            RetryDecision::GiveUp { attempts: 3 }
        );
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut p = policy(5);
        p.initial_delay = Duration::from_millis(1000);
        p.max_delay = Duration::from_millis(1000);
        p.jitter = true;
        let mut backoff = p.backoff();
        match backoff.on_failure() {
            RetryDecision::RetryAfter(d) => {
                assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000))
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_no_retry_policy() {
        let mut backoff = RetryPolicy::no_retry().backoff();
        assert_eq!(
            backoff.on_failure(),
            RetryDecision::GiveUp { attempts: 1 }
        );
    }

    #[tokio::test]
    async fn test_retry_async_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_async(&policy(3), "test", |_: &String| true, move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("failure {}", n))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result, Ok(("done", 3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_async_exhausts() {
        let result: Result<((), u32), _> =
            retry_async(&policy(2), "test", |_: &String| true, || async {
                Err("still down".to_string())
            })
            .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 2,
                last_error: "still down".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_retry_async_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<((), u32), _> =
            retry_async(&policy(5), "test", |_: &String| false, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("bad request".to_string())
                }
            })
            .await;

        assert_eq!(result, Err(RetryError::Permanent("bad request".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
