//! Exponential backoff between reconnection attempts

use std::time::Duration;

use wp_core::config::BackoffConfig;

/// Exponential backoff with optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            current: initial.min(max),
            max,
            multiplier,
            jitter,
        }
    }

    /// Get the next delay and advance: `next = min(current * multiplier, max)`
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = next.min(self.max);

        if self.jitter > 0.0 {
            let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
            delay + Duration::from_secs_f64(jitter_amount)
        } else {
            delay
        }
    }

    /// Reset to the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}
