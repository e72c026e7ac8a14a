//! Reconnect backoff policy
//!
//! Exponential growth from `initial_delay`, capped at `max_delay`, with symmetric
//! random jitter. A [`Backoff`] counts the failed attempts of one connect cycle and
//! reports exhaustion once `max_attempts` is reached.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Failed attempts recorded in the current cycle
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start a new connect cycle
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.config.max_attempts != 0 && self.attempts >= self.config.max_attempts
    }

    /// Record a failed attempt and return how long to wait before the next one
    ///
    /// Returns `None` once the attempt budget is used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.is_exhausted() {
            return None;
        }
        let base = self.base_delay(self.attempts - 1);
        Some(self.apply_jitter(base))
    }

    /// Delay before jitter for the given zero-based retry index
    pub fn base_delay(&self, retry: u32) -> Duration {
        let initial = self.config.initial_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64();
        let exponent = retry.min(63) as i32;
        let delay = initial * self.config.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(max))
    }

    fn apply_jitter(&self, base: Duration) -> Duration {
        if self.config.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-1.0..=1.0) * self.config.jitter;
        let jittered = base.as_secs_f64() * (1.0 + spread);
        Duration::from_secs_f64(jittered.clamp(0.0, self.config.max_delay.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let mut backoff = Backoff::new(deterministic(0));
        let delays: Vec<_> = (0..6).filter_map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1000),
                Duration::from_millis(1000),
            ]
        );
    }

    #[test]
    fn test_attempt_budget() {
        let mut backoff = Backoff::new(deterministic(3));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(backoff.is_exhausted());

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay().is_some());
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut config = deterministic(0);
        config.jitter = 0.5;
        let mut backoff = Backoff::new(config);
        for _ in 0..50 {
            let delay = backoff.next_delay().unwrap();
            assert!(delay <= Duration::from_millis(1000));
        }
        backoff.reset();
        let first = backoff.next_delay().unwrap();
        assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(150));
    }
}
