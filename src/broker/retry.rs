//! Retry policy
//!
//! Exponential backoff for failed settlement deliveries.

use std::time::Duration;

/// When and how often a failed event is delivered again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// True once an event has failed more than `max_retries` times
    pub fn exhausted(&self, retries: u32) -> bool {
        retries > self.max_retries
    }

    /// Delay before re-delivery number `retries` (1-based):
    /// `base * 2^(retries - 1)`, capped at `max_delay`. A zero base
    /// re-delivers immediately.
    pub fn delay(&self, retries: u32) -> Duration {
        if self.base_delay.is_zero() || retries == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retries - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
        }
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = policy(50, 300);
        assert_eq!(policy.delay(1), Duration::from_millis(50));
        assert_eq!(policy.delay(2), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(300));
        assert_eq!(policy.delay(60), Duration::from_millis(300));
    }

    #[test]
    fn test_zero_base_is_immediate() {
        assert_eq!(policy(0, 1000).delay(5), Duration::ZERO);
    }

    #[test]
    fn test_exhausted() {
        let policy = policy(0, 0);
        assert!(!policy.exhausted(3));
        assert!(policy.exhausted(4));
    }
}
