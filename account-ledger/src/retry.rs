//! Bounded retry with exponential backoff and jitter
//!
//! Used for optimistic-concurrency conflicts only: every attempt re-runs the
//! whole read-check-write closure, so business checks always see the balance
//! read in that attempt.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for compare-and-set conflicts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl RetryPolicy {
    /// Build from config, with `max_attempts` attempts in total
    pub fn new(config: &RetryConfig, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay_ms: config.initial_backoff_ms,
            max_delay_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
        }
    }

    /// Policy for ordinary operation legs
    pub fn for_operations(config: &RetryConfig) -> Self {
        Self::new(config, config.max_attempts)
    }

    /// Policy for reversing a transfer debit
    pub fn for_compensation(config: &RetryConfig) -> Self {
        Self::new(config, config.compensation_attempts)
    }

    /// Total attempts allowed
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Calculate delay before retry number `retry` (0-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let base_delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(retry as i32);

        // Cap at max_delay
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent.
    ///
    /// The closure receives the 0-based attempt number. Exhaustion surfaces
    /// as `ConcurrencyExhausted`.
    pub async fn run<T, F>(&self, label: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        for n in 0..self.max_attempts {
            if n > 0 {
                let delay = self.delay(n - 1);
                debug!(
                    "Retry attempt {}/{} for {} after {:?}",
                    n + 1,
                    self.max_attempts,
                    label,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            match attempt(n) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    debug!(
                        "Attempt {}/{} for {} conflicted: {}",
                        n + 1,
                        self.max_attempts,
                        label,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            "Retry budget of {} attempts exhausted for {}",
            self.max_attempts, label
        );
        Err(Error::ConcurrencyExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountId;

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            compensation_attempts: 20,
        }
    }

    fn conflict() -> Error {
        Error::VersionConflict {
            account: AccountId::new("alice"),
            expected: 0,
            actual: 1,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::for_operations(&no_jitter());

        assert_eq!(policy.delay(0).as_millis(), 10);
        assert_eq!(policy.delay(1).as_millis(), 20);
        assert_eq!(policy.delay(2).as_millis(), 40);
        // Capped
        assert_eq!(policy.delay(3).as_millis(), 50);
        assert_eq!(policy.delay(10).as_millis(), 50);
    }

    #[test]
    fn test_compensation_budget() {
        let config = no_jitter();
        assert_eq!(RetryPolicy::for_operations(&config).max_attempts(), 5);
        assert_eq!(RetryPolicy::for_compensation(&config).max_attempts(), 20);
    }

    #[tokio::test]
    async fn test_succeeds_after_conflicts() {
        let mut config = no_jitter();
        config.initial_backoff_ms = 0;
        let policy = RetryPolicy::for_operations(&config);

        let mut calls = 0;
        let result = policy
            .run("test", |n| {
                calls += 1;
                if n < 2 {
                    Err(conflict())
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let mut config = no_jitter();
        config.initial_backoff_ms = 0;
        let policy = RetryPolicy::for_operations(&config);

        let mut calls = 0;
        let result: Result<()> = policy
            .run("test", |_| {
                calls += 1;
                Err(conflict())
            })
            .await;

        assert!(matches!(
            result,
            Err(Error::ConcurrencyExhausted { attempts: 5 })
        ));
        assert_eq!(calls, 5);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let policy = RetryPolicy::for_operations(&no_jitter());

        let mut calls = 0;
        let result: Result<()> = policy
            .run("test", |_| {
                calls += 1;
                Err(Error::AccountNotFound(AccountId::new("ghost")))
            })
            .await;

        assert!(matches!(result, Err(Error::AccountNotFound(_))));
        assert_eq!(calls, 1);
    }
}
