//! Reconnection backoff policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::humantime_serde;

/// Bounded retry policy for connecting to the peer.
///
/// The delay after failed attempt `n` (1-based) is
/// `base_delay * n * backoff_multiplier^(n-1)`, capped at `max_delay`. With the
/// default multiplier of 1.0 this is the linear `base_delay * n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let factor = f64::from(attempt) * self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let cap = self.max_delay.as_millis() as f64;

        if !millis.is_finite() || millis >= cap {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Upper bound on the total time spent sleeping between attempts.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|n| self.delay_for(n)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_linear_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(4), Duration::from_secs(20));
        assert_eq!(policy.total_backoff(), Duration::from_secs(5 + 10 + 15 + 20));
    }

    #[test]
    fn test_exponential_with_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_secs(1));
        assert_eq!(policy.delay_for(30), Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn prop_delay_is_monotonic_and_capped(
            base_ms in 1u64..10_000,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..64,
        ) {
            let policy = RetryPolicy {
                max_attempts: 64,
                base_delay: Duration::from_millis(base_ms),
                backoff_multiplier: multiplier,
                max_delay: Duration::from_secs(120),
            };
            let current = policy.delay_for(attempt);
            let next = policy.delay_for(attempt + 1);
            prop_assert!(current <= policy.max_delay);
            prop_assert!(next >= current);
        }
    }
}
