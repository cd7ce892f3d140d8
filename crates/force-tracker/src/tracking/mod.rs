//! Per-force state estimation.
//!
//! Two collaborating components:
//!
//! - **[`StateEstimator`]**: constant-velocity 2-D Kalman filter
//! - **[`EstimatorRegistry`]**: owns one estimator per force id and routes
//!   reports and forecast queries to it
//!
//! # Example
//!
//! ```rust
//! use force_tracker::tracking::EstimatorRegistry;
//!
//! let registry = EstimatorRegistry::with_defaults();
//! registry.observe("alpha-1", 32.0, 34.8, 0)?;
//! let est = registry.observe("alpha-1", 32.0009, 34.8, 10_000)?;
//! assert!(est.state[2] > 0.0); // moving north
//!
//! let [lat, lon] = registry.forecast("alpha-1", 30.0)?;
//! # let _ = (lat, lon);
//! # Ok::<(), force_tracker::TrackingError>(())
//! ```

pub mod kalman;
pub mod registry;

pub use kalman::{CorrectionOutcome, StateEstimator, StateVector};
pub use registry::{EstimatorRegistry, TrackEstimate};
