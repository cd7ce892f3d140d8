//! Domain types for force tracking.

pub mod dead_zone;
pub mod force;

pub use dead_zone::DeadZone;
pub use force::{ForceSnapshot, LocationReport, SignalStrength};
