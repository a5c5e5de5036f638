//! Reconnect policy for long-lived client connections
//!
//! A policy answers two questions for a failure episode: may attempt `n` run at
//! all, and how long to wait before it. Attempts are numbered from 1 and the
//! counter is owned by the caller; it resets whenever a connection succeeds.

use rand::Rng;
use std::time::Duration;

/// Delay strategy between reconnect attempts
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// `base * attempt`
    Linear { base: Duration },
    /// `initial * multiplier^(attempt - 1)`, capped at `max`, optionally with ±30% jitter
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum number of automatic attempts per failure episode
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::linear(Duration::from_millis(2000), 5)
    }
}

impl ReconnectPolicy {
    pub fn linear(base: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            strategy: BackoffStrategy::Linear { base },
        }
    }

    pub fn exponential(initial: Duration, max: Duration, max_attempts: u32, jitter: bool) -> Self {
        Self {
            max_attempts,
            strategy: BackoffStrategy::Exponential {
                initial,
                max,
                multiplier: 2.0,
                jitter,
            },
        }
    }

    /// Whether attempt number `attempt` (1-based) is still within the ceiling
    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }

    /// Delay to wait before attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match &self.strategy {
            BackoffStrategy::Linear { base } => base.saturating_mul(attempt),
            BackoffStrategy::Exponential {
                initial,
                max,
                multiplier,
                jitter,
            } => {
                let exp = multiplier.powi(attempt.saturating_sub(1).min(32) as i32);
                let raw_ms = (initial.as_millis() as f64 * exp).min(max.as_millis() as f64);
                apply_jitter(Duration::from_millis(raw_ms as u64), *jitter)
            }
        }
    }

    /// Next attempt number and its delay, or `None` once the ceiling is reached
    pub fn next_attempt(&self, attempts_so_far: u32) -> Option<(u32, Duration)> {
        let next = attempts_so_far.saturating_add(1);
        if self.allows(next) {
            Some((next, self.delay_for(next)))
        } else {
            None
        }
    }
}

fn apply_jitter(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let mut rng = rand::thread_rng();
        let factor = 1.0 + rng.gen_range(-0.3..0.3); // ±30%
        Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_delay_grows_with_attempt() {
        let policy = ReconnectPolicy::linear(Duration::from_millis(2000), 5);

        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(10000));
    }

    #[test]
    fn test_ceiling_stops_after_max_attempts() {
        let policy = ReconnectPolicy::linear(Duration::from_millis(10), 5);

        let mut attempts = 0;
        while let Some((next, _)) = policy.next_attempt(attempts) {
            attempts = next;
        }

        assert_eq!(attempts, 5);
        assert!(!policy.allows(6));
        assert!(!policy.allows(0));
    }

    #[test]
    fn test_exponential_is_capped() {
        let policy = ReconnectPolicy::exponential(
            Duration::from_millis(100),
            Duration::from_millis(1000),
            10,
            false,
        );

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(8), Duration::from_millis(1000));
    }

    #[test]
    fn test_exponential_jitter_stays_in_band() {
        let policy = ReconnectPolicy::exponential(
            Duration::from_millis(1000),
            Duration::from_secs(30),
            5,
            true,
        );

        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(700));
            assert!(delay <= Duration::from_millis(1300));
        }
    }

    #[test]
    fn test_zero_ceiling_never_retries() {
        let policy = ReconnectPolicy::linear(Duration::from_millis(10), 0);
        assert!(policy.next_attempt(0).is_none());
    }
}
