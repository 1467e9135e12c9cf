use std::time::Duration;

/// Bounded exponential backoff with additive jitter.
///
/// The delay before retry `attempt` (0-based) is
/// `backoff_base^attempt + U[0, 1) * max_jitter`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff_base: f64,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: 2.0,
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: f64, max_jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            max_jitter,
        }
    }

    /// Delay for `attempt` given a jitter sample in `[0, 1)`.
    pub fn delay(&self, attempt: u32, jitter: f64) -> Duration {
        let exp = self.backoff_base.powi(attempt as i32).max(0.0);
        let jitter = self.max_jitter.as_secs_f64() * jitter.clamp(0.0, 1.0);
        Duration::from_secs_f64(exp + jitter)
    }

    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        self.delay(attempt, rand::random::<f64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_loader_settings() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.backoff_base, 2.0);
        assert_eq!(p.max_jitter, Duration::from_secs(1));
    }

    #[test]
    fn delay_grows_exponentially() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(0, 0.0), Duration::from_secs(1));
        assert_eq!(p.delay(1, 0.0), Duration::from_secs(2));
        assert_eq!(p.delay(3, 0.0), Duration::from_secs(8));
    }

    #[test]
    fn jitter_never_reorders_consecutive_delays() {
        let p = RetryPolicy::default();
        for attempt in 0..4 {
            assert!(p.delay(attempt, 0.999) < p.delay(attempt + 1, 0.0));
        }
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, 2.0, Duration::ZERO).max_attempts, 1);
    }
}
