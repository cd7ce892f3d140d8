//! EstimatorRegistry: one [`StateEstimator`] per tracked force.
//!
//! The map is a [`DashMap`] so that lookup-or-create is atomic per key and
//! unrelated forces land on different shards. Each entry is an
//! `Arc<Mutex<_>>`; the shard lock is only held long enough to clone the
//! `Arc`, and the filter itself is updated under the per-force mutex. Two
//! reports for the same force therefore never interleave, while reports for
//! different forces never wait on each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::kalman::{CorrectionOutcome, StateEstimator, StateVector};
use crate::{config::FilterConfig, Result, TrackingError};

/// Post-update view of one force's filter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackEstimate {
    /// Filtered state [lat, lon, v_lat, v_lon]
    pub state: StateVector,
    /// Variances of the two position components
    pub position_variance: [f64; 2],
    /// Latest report timestamp the filter has advanced to (ms)
    pub timestamp_ms: i64,
    /// Number of reports accepted since the filter was created
    pub reports: u64,
    /// Registry-unique number of the filter instance, increasing with creation order
    pub generation: u64,
}

/// Filter plus the timestamp bookkeeping used to derive `dt`.
#[derive(Debug)]
struct TrackedEstimator {
    estimator: StateEstimator,
    last_timestamp_ms: i64,
    reports: u64,
    generation: u64,
}

impl TrackedEstimator {
    fn first_fix(
        lat: f64,
        lon: f64,
        timestamp_ms: i64,
        generation: u64,
        config: &FilterConfig,
    ) -> Self {
        Self {
            estimator: StateEstimator::from_config([lat, lon, 0.0, 0.0], config),
            last_timestamp_ms: timestamp_ms,
            reports: 1,
            generation,
        }
    }

    fn snapshot(&self) -> TrackEstimate {
        TrackEstimate {
            state: self.estimator.estimate(),
            position_variance: self.estimator.position_variance(),
            timestamp_ms: self.last_timestamp_ms,
            reports: self.reports,
            generation: self.generation,
        }
    }
}

/// Owns the id → estimator mapping for every tracked force.
pub struct EstimatorRegistry {
    estimators: DashMap<String, Arc<Mutex<TrackedEstimator>>>,
    config: FilterConfig,
    singular_corrections: AtomicU64,
    next_generation: AtomicU64,
}

impl EstimatorRegistry {
    /// Create an empty registry whose estimators use `config`.
    pub fn new(config: FilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            estimators: DashMap::new(),
            config,
            singular_corrections: AtomicU64::new(0),
            next_generation: AtomicU64::new(1),
        })
    }

    /// Create an empty registry with the default noise settings.
    pub fn with_defaults() -> Self {
        Self {
            estimators: DashMap::new(),
            config: FilterConfig::default(),
            singular_corrections: AtomicU64::new(0),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Feed one report for `id` and return the post-update estimate.
    ///
    /// - Unknown id: a new filter is created with its position set directly
    ///   to the report, zero velocity and full initial covariance.
    /// - Known id: `dt` is the time since the latest report already applied
    ///   to this filter. Late or duplicate reports are applied with `dt = 0`
    ///   and do not move the filter's clock backwards.
    ///
    /// The filter clock is monotone: it keeps the largest timestamp seen, not
    /// the most recent one, so a late report cannot inflate the next `dt`.
    ///
    /// Coordinates must be finite, latitude in [-90, 90] and longitude in
    /// [-180, 180]; rejected reports leave every filter untouched.
    pub fn observe(
        &self,
        id: &str,
        latitude: f64,
        longitude: f64,
        timestamp_ms: i64,
    ) -> Result<TrackEstimate> {
        validate_coordinates(latitude, longitude)?;

        let mut created = false;
        let slot = {
            let entry = self.estimators.entry(id.to_owned()).or_insert_with(|| {
                created = true;
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                Arc::new(Mutex::new(TrackedEstimator::first_fix(
                    latitude,
                    longitude,
                    timestamp_ms,
                    generation,
                    &self.config,
                )))
            });
            Arc::clone(entry.value())
        };

        let mut track = slot.lock();
        if created {
            tracing::debug!(force_id = %id, latitude, longitude, "Created estimator");
            return Ok(track.snapshot());
        }

        let elapsed_ms = timestamp_ms.saturating_sub(track.last_timestamp_ms);
        if elapsed_ms < 0 {
            tracing::debug!(
                force_id = %id,
                behind_ms = -elapsed_ms,
                "Out-of-order report, applying with dt = 0"
            );
        }
        let dt = elapsed_ms.max(0) as f64 / 1000.0;

        let outcome = track.estimator.update(latitude, longitude, dt)?;
        if outcome == CorrectionOutcome::SingularFallback {
            let total = self.singular_corrections.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                force_id = %id,
                total_singular = total,
                "Singular innovation covariance, identity fallback used"
            );
        }

        track.last_timestamp_ms = track.last_timestamp_ms.max(timestamp_ms);
        track.reports += 1;
        Ok(track.snapshot())
    }

    /// Position of `id` extrapolated `horizon_secs` from its current estimate.
    pub fn forecast(&self, id: &str, horizon_secs: f64) -> Result<[f64; 2]> {
        let slot = self.slot(id)?;
        let track = slot.lock();
        track.estimator.forecast(horizon_secs)
    }

    /// Current estimate for `id` without advancing the filter.
    pub fn estimate(&self, id: &str) -> Result<TrackEstimate> {
        let slot = self.slot(id)?;
        let snapshot = slot.lock().snapshot();
        Ok(snapshot)
    }

    fn slot(&self, id: &str) -> Result<Arc<Mutex<TrackedEstimator>>> {
        self.estimators
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TrackingError::UnknownEntity(id.to_owned()))
    }

    /// Generation of the filter currently held for `id`.
    pub fn generation(&self, id: &str) -> Option<u64> {
        let slot = self.slot(id).ok()?;
        let generation = slot.lock().generation;
        Some(generation)
    }

    /// Drop the estimator for `id`. Returns `true` if one existed.
    ///
    /// A later report for the same id starts a fresh filter.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.estimators.remove(id).is_some();
        if removed {
            tracing::debug!(force_id = %id, "Removed estimator");
        }
        removed
    }

    /// Drop every estimator.
    pub fn clear(&self) {
        self.estimators.clear();
    }

    /// True if an estimator exists for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.estimators.contains_key(id)
    }

    /// Number of tracked forces.
    pub fn len(&self) -> usize {
        self.estimators.len()
    }

    /// True if no force is tracked.
    pub fn is_empty(&self) -> bool {
        self.estimators.is_empty()
    }

    /// Ids of all tracked forces, in no particular order.
    pub fn ids(&self) -> Vec<String> {
        self.estimators.iter().map(|e| e.key().clone()).collect()
    }

    /// Total corrections that hit the singular-S fallback.
    pub fn singular_corrections(&self) -> u64 {
        self.singular_corrections.load(Ordering::Relaxed)
    }

    /// Noise settings used for new estimators.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
}

impl Default for EstimatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Geographic range check applied before any filter is touched.
pub(crate) fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(TrackingError::InvalidInput(format!(
            "latitude must be within [-90, 90], got {latitude}"
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(TrackingError::InvalidInput(format!(
            "longitude must be within [-180, 180], got {longitude}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
