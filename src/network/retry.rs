//! Retry Policy
//!
//! Exponential backoff for transient failures. The attempt bound counts the
//! initial request; a `Retry-After` hint replaces the computed delay but is
//! still capped at `max_delay`.

use crate::config::RetryConfig;
use crate::error::NetworkError;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;

/// Retry policy for the network client
///
/// ```rust
/// # use client_resilience::network::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first request
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt, no retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `retry` (0-indexed), without hints
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(63) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor).min(u64::MAX as f64);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based)
    pub fn should_retry(&self, attempt: u32, err: &NetworkError) -> bool {
        err.is_retryable() && attempt < self.max_attempts
    }

    /// Fresh backoff schedule for one logical request
    pub fn schedule(&self) -> RetrySchedule {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_multiplier(self.multiplier.max(1.0))
            .with_max_interval(self.max_delay)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        RetrySchedule {
            backoff,
            max_delay: self.max_delay,
        }
    }
}

/// Per-request backoff state
pub struct RetrySchedule {
    backoff: ExponentialBackoff,
    max_delay: Duration,
}

impl RetrySchedule {
    /// Delay before the next attempt after `err`
    pub fn next_delay(&mut self, err: &NetworkError) -> Duration {
        let computed = self.backoff.next_backoff().unwrap_or(self.max_delay);
        err.retry_after()
            .unwrap_or(computed)
            .min(self.max_delay)
    }
}

impl std::fmt::Debug for RetrySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrySchedule")
            .field("current", &self.backoff.current_interval)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error() -> NetworkError {
        NetworkError::ServerError {
            status: 503,
            message: "unavailable".into(),
        }
    }

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_schedule_grows_and_caps() {
        let mut schedule = RetryPolicy::default().schedule();
        let err = server_error();
        let delays: Vec<u64> = (0..5).map(|_| schedule.next_delay(&err).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_retry_after_is_capped() {
        let mut schedule = RetryPolicy::default().schedule();
        let hinted = NetworkError::RateLimited {
            retry_after: Some(Duration::from_secs(1)),
        };
        assert_eq!(schedule.next_delay(&hinted), Duration::from_secs(1));

        let too_long = NetworkError::RateLimited {
            retry_after: Some(Duration::from_secs(600)),
        };
        assert_eq!(schedule.next_delay(&too_long), Duration::from_secs(10));
    }

    #[test]
    fn test_should_retry_bound() {
        let policy = RetryPolicy::default();
        let err = server_error();
        assert!(policy.should_retry(1, &err));
        assert!(policy.should_retry(2, &err));
        assert!(!policy.should_retry(3, &err));
        assert!(!policy.should_retry(1, &NetworkError::Forbidden("no".into())));
        assert!(!RetryPolicy::disabled().should_retry(1, &err));
    }
}
