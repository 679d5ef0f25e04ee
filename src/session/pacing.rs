use crate::config::SessionConfig;
use chrono::{Local, Timelike};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pacing multiplier for a local hour of day
///
/// | Hours | Factor |
/// |-------|--------|
/// | 08-17 | 1.0 |
/// | 18-22 | 1.3 |
/// | 23-07 | 1.6 |
pub fn time_of_day_factor(hour: u32) -> f64 {
    match hour {
        8..=17 => 1.0,
        18..=22 => 1.3,
        _ => 1.6,
    }
}

/// Randomized delay between page requests of a session
#[derive(Debug, Clone)]
pub struct Pacer {
    min_ms: u64,
    max_ms: u64,
}

impl Pacer {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: max_ms.max(min_ms),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.pacing_min_ms, config.pacing_max_ms)
    }

    /// Delay for a given local hour
    pub fn delay_at(&self, hour: u32) -> Duration {
        if self.max_ms == 0 {
            return Duration::ZERO;
        }
        let base = rand::rng().random_range(self.min_ms..=self.max_ms);
        Duration::from_millis((base as f64 * time_of_day_factor(hour)) as u64)
    }

    pub fn next_delay(&self) -> Duration {
        self.delay_at(Local::now().hour())
    }

    /// Waits one pacing delay; returns false if cancelled first
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
