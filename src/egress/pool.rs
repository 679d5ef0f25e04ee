//! Shared egress pool with health-based selection
//!
//! All counter updates and quarantine transitions happen behind one mutex, so
//! sessions reporting outcomes for the same point concurrently never race.

use crate::config::{load_egress_entries, EgressConfig};
use crate::egress::point::{parse_egress_entry, EgressEndpoint, EgressHealth, EgressPoint};
use crate::ConfigError;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A point handed out by the pool for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressLease {
    /// Index of the point inside its pool
    pub id: usize,
    pub endpoint: EgressEndpoint,
}

/// Aggregate pool health for run summaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub quarantined: usize,
    pub quarantine_events: u64,
    pub reactivations: u64,
}

#[derive(Debug)]
struct PoolState {
    points: Vec<EgressPoint>,
    quarantine_events: u64,
    reactivations: u64,
}

/// Egress pool shared by every fetch
#[derive(Debug)]
pub struct EgressPool {
    state: Mutex<PoolState>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl EgressPool {
    /// Creates a pool from endpoints, in the given order
    pub fn new(endpoints: Vec<EgressEndpoint>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(PoolState {
                points: endpoints.into_iter().map(EgressPoint::new).collect(),
                quarantine_events: 0,
                reactivations: 0,
            }),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// Builds the pool from configuration: the direct point (if enabled) first,
    /// then inline entries, then entries from the list file
    pub fn from_config(config: &EgressConfig) -> Result<Self, ConfigError> {
        let mut endpoints = Vec::new();
        if config.include_direct {
            endpoints.push(EgressEndpoint::direct());
        }

        for entry in load_egress_entries(config)? {
            let endpoint = parse_egress_entry(&entry)?;
            if !endpoints.contains(&endpoint) {
                endpoints.push(endpoint);
            }
        }

        tracing::info!("Loaded egress pool with {} points", endpoints.len());

        Ok(Self::new(
            endpoints,
            config.failure_threshold,
            Duration::from_secs(config.cooldown_secs),
        ))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // A panic elsewhere must not take the pool down with it
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn len(&self) -> usize {
        self.lock().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Selects an egress point for the next attempt
    ///
    /// Returns None only when the pool is empty; the caller then goes direct.
    pub fn acquire(&self) -> Option<EgressLease> {
        self.acquire_excluding(None)
    }

    /// Selects an egress point other than `exclude`
    ///
    /// Among active points, the least recently used half is considered and the
    /// one with the best success rate wins. When nothing is active, quarantine
    /// is cleared once and selection retried.
    pub fn acquire_excluding(&self, exclude: Option<usize>) -> Option<EgressLease> {
        let now = Instant::now();
        let mut state = self.lock();

        self.reactivate_cooled(&mut state, now);

        let mut chosen = self.select(&state, exclude);
        if chosen.is_none() {
            let cleared = self.clear_quarantine(&mut state, exclude);
            if cleared > 0 {
                tracing::warn!(
                    "No active egress points, cleared quarantine on {} points",
                    cleared
                );
            }
            chosen = self.select(&state, exclude);
        }

        let id = chosen?;
        let point = &mut state.points[id];
        point.last_used_at = Some(now);

        Some(EgressLease {
            id,
            endpoint: point.endpoint.clone(),
        })
    }

    fn select(&self, state: &PoolState, exclude: Option<usize>) -> Option<usize> {
        let mut candidates: Vec<(usize, &EgressPoint)> = state
            .points
            .iter()
            .enumerate()
            .filter(|(id, point)| {
                Some(*id) != exclude
                    && point.health(self.failure_threshold) == EgressHealth::Active
            })
            .collect();

        if candidates.is_empty() {
            return None;
        }

        // Never-used points sort first (None < Some)
        candidates.sort_by_key(|(id, point)| (point.last_used_at, *id));

        let window = candidates.len().div_ceil(2);
        let mut best = candidates[0];
        for candidate in candidates.iter().take(window).skip(1) {
            if candidate.1.selection_score() > best.1.selection_score() {
                best = *candidate;
            }
        }

        Some(best.0)
    }

    fn reactivate_cooled(&self, state: &mut PoolState, now: Instant) {
        let mut reactivated = 0;
        for point in state.points.iter_mut() {
            if let Some(since) = point.quarantined_at {
                if point.health(self.failure_threshold) == EgressHealth::Quarantined
                    && now.duration_since(since) >= self.cooldown
                {
                    tracing::info!(
                        "Egress point {} reactivated after cooldown",
                        point.endpoint.label()
                    );
                    point.reactivate();
                    reactivated += 1;
                }
            }
        }
        state.reactivations += reactivated;
    }

    fn clear_quarantine(&self, state: &mut PoolState, exclude: Option<usize>) -> usize {
        let mut cleared = 0;
        for (id, point) in state.points.iter_mut().enumerate() {
            if Some(id) != exclude && point.health(self.failure_threshold) == EgressHealth::Quarantined
            {
                point.reactivate();
                cleared += 1;
            }
        }
        state.reactivations += cleared as u64;
        cleared
    }

    /// Reports the outcome of an attempt made through a point
    pub fn report(&self, id: usize, success: bool, reason: Option<&str>) {
        let now = Instant::now();
        let mut state = self.lock();
        let threshold = self.failure_threshold;

        let newly_quarantined = match state.points.get_mut(id) {
            Some(point) if success => {
                point.record_success();
                false
            }
            Some(point) => {
                let quarantined = point.record_failure(threshold, now);
                if quarantined {
                    tracing::warn!(
                        "Egress point {} quarantined after {} consecutive failures ({})",
                        point.endpoint.label(),
                        point.consecutive_failures,
                        reason.unwrap_or("unspecified")
                    );
                } else {
                    tracing::debug!(
                        "Egress point {} failure {} ({})",
                        point.endpoint.label(),
                        point.consecutive_failures,
                        reason.unwrap_or("unspecified")
                    );
                }
                quarantined
            }
            None => {
                tracing::debug!("Ignoring report for unknown egress point {}", id);
                false
            }
        };

        if newly_quarantined {
            state.quarantine_events += 1;
        }
    }

    /// Quarantines a point immediately, e.g. when a challenge demands rotation
    pub fn quarantine(&self, id: usize, reason: &str) {
        let now = Instant::now();
        let mut state = self.lock();
        let threshold = self.failure_threshold;

        let quarantined = match state.points.get_mut(id) {
            Some(point) => {
                let changed = point.force_quarantine(threshold, now);
                if changed {
                    tracing::warn!(
                        "Egress point {} quarantined: {}",
                        point.endpoint.label(),
                        reason
                    );
                }
                changed
            }
            None => false,
        };

        if quarantined {
            state.quarantine_events += 1;
        }
    }

    /// Clears quarantine on every point
    pub fn reset(&self) {
        let mut state = self.lock();
        let cleared = self.clear_quarantine(&mut state, None);
        tracing::info!("Egress pool reset, {} points reactivated", cleared);
    }

    /// Returns a copy of every point with its counters
    pub fn snapshot(&self) -> Vec<EgressPoint> {
        self.lock().points.clone()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        let quarantined = state
            .points
            .iter()
            .filter(|p| p.health(self.failure_threshold) == EgressHealth::Quarantined)
            .count();

        PoolStats {
            total: state.points.len(),
            active: state.points.len() - quarantined,
            quarantined,
            quarantine_events: state.quarantine_events,
            reactivations: state.reactivations,
        }
    }
}
