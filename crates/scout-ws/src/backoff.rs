//! Reconnect backoff policy.

use std::time::Duration;

/// Capped exponential backoff: `base * 2^(attempt-1)`, never above `cap`.
///
/// Jitter is optional and added after capping is checked, so the returned
/// delay stays within `cap + jitter_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of random jitter added per delay (0 = deterministic).
    pub jitter_max_ms: u64,
    /// Consecutive failures tolerated before giving up (0 = unbounded).
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            jitter_max_ms: 0,
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    ///
    /// attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base ...
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Delay before retry number `attempt`, with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay_for(attempt) + Duration::from_millis(self.jitter())
    }

    /// True once `failures` consecutive failures exceed the retry bound.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_retries > 0 && failures > self.max_retries
    }

    fn jitter(&self) -> u64 {
        if self.jitter_max_ms == 0 {
            return 0;
        }
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        u64::from(nanos) % (self.jitter_max_ms + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_failures_sequence() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|n| policy.delay_for(n).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32]);
    }

    #[test]
    fn test_delay_never_exceeds_cap() {
        let policy = BackoffPolicy::default();
        for attempt in 1..=64 {
            assert!(policy.base_delay_for(attempt) <= Duration::from_secs(60));
        }
        assert_eq!(policy.base_delay_for(6), Duration::from_secs(60));
        assert_eq!(policy.base_delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = BackoffPolicy {
            jitter_max_ms: 500,
            ..Default::default()
        };
        for attempt in 1..=10 {
            let delay = policy.delay_for(attempt);
            let base = policy.base_delay_for(attempt);
            assert!(delay >= base);
            assert!(delay <= base + Duration::from_millis(500));
        }
    }

    #[test]
    fn test_exhaustion_bound() {
        let policy = BackoffPolicy::default();
        assert!(!policy.is_exhausted(5));
        assert!(policy.is_exhausted(6));

        let unbounded = BackoffPolicy {
            max_retries: 0,
            ..Default::default()
        };
        assert!(!unbounded.is_exhausted(u32::MAX));
    }
}
