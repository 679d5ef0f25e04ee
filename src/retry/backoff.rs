use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with full jitter
///
/// The delay for attempt `n` is drawn uniformly from `[0, min(cap, base * multiplier^n)]`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_ms: u64,
    cap_ms: u64,
    multiplier: f64,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, cap_ms: u64, multiplier: f64) -> Self {
        Self {
            base_ms,
            cap_ms: cap_ms.max(base_ms),
            multiplier: multiplier.max(1.0),
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.base_ms, config.cap_ms, config.multiplier)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }

    /// Upper bound of the jitter window for an attempt
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(63) as i32;
        let raw = self.base_ms as f64 * self.multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.cap_ms as f64)
        } else {
            self.cap_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    /// Mean of the jitter window, half the ceiling
    pub fn expected_delay(&self, attempt: u32) -> Duration {
        self.ceiling(attempt) / 2
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        let ceiling_ms = self.ceiling(attempt).as_millis() as u64;
        let jittered = rand::rng().random_range(0..=ceiling_ms);
        Duration::from_millis(jittered)
    }

    /// Raises a delay to a server-provided floor (Retry-After), never past the cap
    pub fn with_floor(&self, delay: Duration, floor: Option<Duration>) -> Duration {
        match floor {
            Some(floor) => delay.max(floor.min(self.cap())),
            None => delay,
        }
    }
}
