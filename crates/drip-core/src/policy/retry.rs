//! Retry policy for transient store failures inside one run.

use std::time::Duration;

/// Exponential backoff: `base_delay * multiplier^(attempt - 1)`.
///
/// `max_attempts` counts the first try, so 3 means one try plus two retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn default_v1() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            multiplier: 2.0,
        }
    }

    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retrying after the `attempts`-th failure (1-indexed).
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }

    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_v1()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::default_v1();

        assert_eq!(policy.next_delay(1), Duration::from_millis(250));
        assert_eq!(policy.next_delay(2), Duration::from_millis(500));
        assert_eq!(policy.next_delay(3), Duration::from_millis(1000));
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::default_v1();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }
}
