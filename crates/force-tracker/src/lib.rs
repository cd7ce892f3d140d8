//! # Force Tracker
//!
//! Real-time location smoothing and short-horizon prediction for field
//! forces reporting noisy GPS fixes.
//!
//! Every force gets its own constant-velocity Kalman filter. Reports are
//! routed to the filter for their id, smoothed positions and velocities are
//! kept in a directory, and positions can be extrapolated a few seconds or
//! minutes ahead.
//!
//! ## Features
//!
//! - **State Estimation**: 4-state `[x, y, vx, vy]` filter with singular
//!   innovation fallback and covariance conditioning
//! - **Per-Force Registry**: concurrent reports for different forces never
//!   block each other; reports for one force are applied one at a time
//! - **Force Directory**: latest record, connectivity and dead-zone membership
//!   per force, with change notifications
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ForceService                 │
//! ├──────────────────────────────────────────────┤
//! │  ┌────────────┐ ┌───────────┐ ┌───────────┐  │
//! │  │ Estimator  │ │   Force   │ │ Dead-Zone │  │
//! │  │  Registry  │ │ Directory │ │ Registry  │  │
//! │  └─────┬──────┘ └───────────┘ └───────────┘  │
//! │        │                                     │
//! │  ┌─────▼──────────┐                          │
//! │  │ StateEstimator │ (one per force)          │
//! │  └────────────────┘                          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use force_tracker::{ForceService, LocationReport};
//!
//! let service = ForceService::with_defaults();
//! service.report(LocationReport::new("alpha-1", 32.0, 34.8, 0).with_type("infantry"))?;
//! let snap = service.report(LocationReport::new("alpha-1", 32.0009, 34.8, 10_000))?;
//!
//! assert!(snap.estimate[2] > 0.0);
//! let [lat, _lon] = service.forecast("alpha-1", 60.0)?;
//! assert!(lat > snap.estimate[0]);
//! # Ok::<(), force_tracker::TrackingError>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod domain;
pub mod service;
pub mod tracking;

pub use config::{FilterConfig, TrackerConfig, TrackerConfigBuilder};
pub use domain::{DeadZone, ForceSnapshot, LocationReport, SignalStrength};
pub use service::{DeadZoneRegistry, ForceDirectory, ForceEvent, ForceService};
pub use tracking::{CorrectionOutcome, EstimatorRegistry, StateEstimator, StateVector, TrackEstimate};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common result type for tracking operations
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Unified error type for tracking operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackingError {
    /// Non-finite or out-of-range input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No estimator exists for the id
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        DeadZone, EstimatorRegistry, FilterConfig, ForceEvent, ForceService, ForceSnapshot,
        LocationReport, Result, SignalStrength, StateEstimator, TrackerConfig, TrackingError,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = TrackingError::UnknownEntity("ghost".into());
        assert_eq!(err.to_string(), "Unknown entity: ghost");
        assert!(TrackingError::Config("bad".into())
            .to_string()
            .starts_with("Configuration error"));
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
