//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;

/// Retry policy for failed tasks.
///
/// `delay = min(base_delay * multiplier^retry_count, max_delay)`, then up to
/// `jitter * delay` extra is added at random so retries of a burst of failures
/// do not land on the store at the same instant.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound before jitter.
    pub max_delay: Duration,

    /// Fraction of the delay added as random jitter, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60 * 60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Exponential policy without jitter.
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 2.0,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Backoff before the next attempt, given the failures retried so far.
    ///
    /// Example with base_delay=1s, multiplier=2.0:
    /// - retry_count 0 (first failure): 1s
    /// - retry_count 1: 2s
    /// - retry_count 2: 4s
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let delay = self.base_delay_for(retry_count);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay + delay.mul_f64(extra)
    }

    fn base_delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(3, 8)]
    fn exponential_backoff_doubles(#[case] retry_count: u32, #[case] secs: u64) {
        let policy = RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(3600));
        assert_eq!(policy.backoff(retry_count), Duration::from_secs(secs));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.backoff(10), Duration::from_secs(10));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::exponential(Duration::from_secs(4), Duration::from_secs(3600))
            .with_jitter(0.5);
        for _ in 0..100 {
            let d = policy.backoff(0);
            assert!(d >= Duration::from_secs(4));
            assert!(d <= Duration::from_secs(6));
        }
    }

    #[test]
    fn jitter_is_clamped() {
        let policy = RetryPolicy::default().with_jitter(3.0);
        assert_eq!(policy.jitter, 1.0);
    }
}
