//! Bounded exponential backoff for transient provider failures.

use std::time::Duration;

/// Retry schedule: up to `max_retries` retries after the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// Total number of attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// `jitter` in `[0, 1]` scales the capped exponential delay into
    /// `[delay / 2, delay]` so that concurrent workers spread out.
    pub fn delay(&self, retry: u32, jitter: f64) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        let raw = self.base.saturating_mul(factor).min(self.max);
        let permille = 500 + (jitter.clamp(0.0, 1.0) * 500.0) as u32;
        raw.saturating_mul(permille) / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 3,
            base: Duration::from_millis(100),
            max: Duration::from_millis(1000),
        }
    }

    #[test]
    fn delay_doubles_until_capped() {
        let p = policy();
        let full = |retry| p.delay(retry, 1.0);
        assert_eq!(full(0), Duration::from_millis(100));
        assert_eq!(full(1), Duration::from_millis(200));
        assert_eq!(full(3), Duration::from_millis(800));
        assert_eq!(full(10), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_halves_at_most() {
        let p = policy();
        assert_eq!(p.delay(1, 0.0), Duration::from_millis(100));
        assert_eq!(p.delay(1, 5.0), Duration::from_millis(200));
    }

    #[test]
    fn attempts_include_first_call() {
        assert_eq!(policy().max_attempts(), 4);
    }
}
