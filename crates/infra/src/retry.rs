//! Reconnect backoff for the broker, the status store and their subscribers.

use std::time::Duration;

/// Capped exponential backoff with a small deterministic jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first try (`None` = never give up).
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay (0.0-1.0) spread around it.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    /// A few quick retries; for single store/broker calls.
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(0),
            ..Self::default()
        }
    }

    /// Keep retrying; for long-running consumers.
    pub fn forever(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: None,
            base_delay,
            max_delay,
            jitter: 0.1,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        // Past 2^20 the cap always wins.
        let factor = 1u32 << (attempt - 1).min(20);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        // Spread retries from different attempts apart without an RNG.
        let offset = ((attempt % 100) * 17 % 100) as f64 / 100.0 - 0.5;
        let millis = delay.as_millis() as f64 * (1.0 + self.jitter * offset * 2.0);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::forever(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = exact(100, 10_000);
        let delays: Vec<u64> = (1..=4).map(|a| policy.delay_for_attempt(a).as_millis() as u64).collect();
        assert_eq!(delays, [100, 200, 400, 800]);
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn delay_is_capped_even_for_huge_attempts() {
        let policy = exact(100, 1_000);
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_its_fraction() {
        let policy = RetryPolicy::forever(Duration::from_millis(1_000), Duration::from_millis(1_000));
        for attempt in 1..50 {
            let ms = policy.delay_for_attempt(attempt).as_millis();
            assert!((900..=1_100).contains(&ms), "attempt {attempt}: {ms}ms");
        }
    }

    #[test]
    fn attempt_limits() {
        assert!(!RetryPolicy::no_retry().should_retry(0));

        let default = RetryPolicy::default();
        assert!(default.should_retry(2));
        assert!(!default.should_retry(3));

        assert!(RetryPolicy::forever(Duration::from_millis(10), Duration::from_secs(5)).should_retry(u32::MAX - 1));
    }
}
