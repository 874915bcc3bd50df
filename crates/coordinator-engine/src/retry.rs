//! Retry backoff for `TaskServerExecutor` failure handling: `delay =
//! min(base × multiplier^retryCount, maxDelay)`, jittered to avoid a
//! thundering herd of simultaneous retries after a shared dependency
//! recovers.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `retry_count` prior failures
    /// (0-based: the first retry after one failure is `delay_for(0)`).
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(retry_count.max(0));
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(capped);
        }
        let mut rng = rand::thread_rng();
        let spread = capped * self.jitter;
        let jittered = (capped + rng.gen_range(-spread..spread)).max(0.0);
        Duration::from_secs_f64(jittered)
    }

    pub fn exhausted(&self, retry_count: i32, max_retries: i32) -> bool {
        retry_count >= max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn first_retry_uses_base_delay() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(0), Duration::from_secs(5));
    }

    #[test]
    fn delay_grows_exponentially() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(20));
    }

    #[test]
    fn delay_caps_at_max() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(10), policy.max_delay);
    }

    #[test]
    fn exhausted_once_retry_count_meets_max() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(1, 3));
        assert!(policy.exhausted(3, 3));
        assert!(policy.exhausted(4, 3));
    }
}
