//! Configuration for the estimator core and the force service.

use crate::{Result, TrackingError};

/// Noise and initial-uncertainty settings shared by every [`StateEstimator`].
///
/// All diagonals are ordered `[x, y, vx, vy]` (state) or `[x, y]`
/// (measurement). Values are variances, not standard deviations.
///
/// [`StateEstimator`]: crate::tracking::StateEstimator
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FilterConfig {
    /// Diagonal of P₀ for a freshly created estimator (default: 1000 each)
    pub initial_variance: [f64; 4],
    /// Diagonal of the process noise Q (default: 0.1, 0.1, 0.5, 0.5)
    pub process_noise: [f64; 4],
    /// Diagonal of the measurement noise R (default: 10, 10)
    pub measurement_noise: [f64; 2],
    /// |det(S)| below this is treated as singular (default: 1e-10)
    pub singular_threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            initial_variance: [1000.0; 4],
            process_noise: [0.1, 0.1, 0.5, 0.5],
            measurement_noise: [10.0, 10.0],
            singular_threshold: 1e-10,
        }
    }
}

impl FilterConfig {
    /// Reject negative or non-finite variances and thresholds.
    pub fn validate(&self) -> Result<()> {
        check_variances("initial_variance", &self.initial_variance)?;
        check_variances("process_noise", &self.process_noise)?;
        check_variances("measurement_noise", &self.measurement_noise)?;
        if !self.singular_threshold.is_finite() || self.singular_threshold < 0.0 {
            return Err(TrackingError::Config(format!(
                "singular_threshold must be finite and non-negative, got {}",
                self.singular_threshold
            )));
        }
        Ok(())
    }
}

fn check_variances(name: &str, values: &[f64]) -> Result<()> {
    match values.iter().find(|v| !v.is_finite() || **v < 0.0) {
        Some(bad) => Err(TrackingError::Config(format!(
            "{name} entries must be finite and non-negative, got {bad}"
        ))),
        None => Ok(()),
    }
}

/// Configuration for [`ForceService`](crate::service::ForceService).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrackerConfig {
    /// Estimator noise settings
    pub filter: FilterConfig,
    /// A force with no report for longer than this is disconnected (ms)
    pub disconnect_after_ms: i64,
    /// Period of the background staleness sweep (ms)
    pub staleness_check_interval_ms: u64,
    /// Capacity of the update broadcast channel
    pub broadcast_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            disconnect_after_ms: 30_000,
            staleness_check_interval_ms: 10_000,
            broadcast_capacity: 1024,
        }
    }
}

impl TrackerConfig {
    /// Create a new configuration builder
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder::default()
    }
}

/// Builder for TrackerConfig
#[derive(Debug, Default)]
pub struct TrackerConfigBuilder {
    config: TrackerConfig,
}

impl TrackerConfigBuilder {
    /// Set the estimator noise settings
    pub fn filter(mut self, filter: FilterConfig) -> Self {
        self.config.filter = filter;
        self
    }

    /// Set the disconnection threshold
    pub fn disconnect_after_ms(mut self, ms: i64) -> Self {
        self.config.disconnect_after_ms = ms.max(0);
        self
    }

    /// Set the staleness sweep period
    pub fn staleness_check_interval_ms(mut self, ms: u64) -> Self {
        self.config.staleness_check_interval_ms = ms.max(100);
        self
    }

    /// Set the broadcast channel capacity
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.config.broadcast_capacity = capacity.max(1);
        self
    }

    /// Build the configuration
    pub fn build(self) -> TrackerConfig {
        self.config
    }
}
