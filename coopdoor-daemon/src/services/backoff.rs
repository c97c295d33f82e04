use std::time::Duration;

use crate::configs::Link;

/// Exponential reconnect delays, bounded by a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    multiplier: f64,
    max: Duration,
    attempt: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        let multiplier = if multiplier.is_finite() {
            multiplier.clamp(1.0, 10.0)
        } else {
            2.0
        };
        let max = max.max(base);

        Self {
            base,
            multiplier,
            max,
            attempt: 0,
            current: base,
        }
    }

    pub fn from_policy(policy: &Link) -> Self {
        Self::new(policy.base_delay(), policy.multiplier, policy.max_delay())
    }

    /// Counts a failed attempt and returns its number with the delay before the next one.
    pub fn next_delay(&mut self) -> (u32, Duration) {
        self.attempt = self.attempt.saturating_add(1);
        let delay = if self.attempt == 1 {
            self.base
        } else {
            self.current.mul_f64(self.multiplier).min(self.max)
        };
        self.current = delay;

        (self.attempt, delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current = self.base;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
