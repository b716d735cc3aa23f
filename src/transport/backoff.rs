use std::time::Duration;

use rand::Rng;

use crate::config::TransportConfig;

/// Capped exponential backoff shared by every retrying call site.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of each delay that may be shaved off at random.
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based), before jitter.
    pub fn ceiling_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay with `sample` in `[0, 1)` standing in for the random draw.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let factor = 1.0 - self.jitter * sample.clamp(0.0, 1.0);
        self.ceiling_for(attempt).mul_f64(factor)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let sample: f64 = rand::rng().random_range(0.0..1.0);
        self.delay_with_sample(attempt, sample)
    }

    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
