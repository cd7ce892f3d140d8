//! Force reports and directory records.

use crate::{Result, TrackingError};

/// Self-reported radio signal quality of a force's device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SignalStrength {
    /// No signal (level 0)
    #[default]
    None,
    /// Level 1
    Weak,
    /// Level 2
    Medium,
    /// Level 3
    Good,
    /// Level 4
    Excellent,
}

impl SignalStrength {
    /// Parse a 0-4 level as sent by field devices.
    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            0 => Ok(Self::None),
            1 => Ok(Self::Weak),
            2 => Ok(Self::Medium),
            3 => Ok(Self::Good),
            4 => Ok(Self::Excellent),
            other => Err(TrackingError::InvalidInput(format!(
                "signal strength level must be 0-4, got {other}"
            ))),
        }
    }

    /// The 0-4 level.
    pub fn level(&self) -> u8 {
        *self as u8
    }

    /// Short human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Weak => "weak",
            Self::Medium => "medium",
            Self::Good => "good",
            Self::Excellent => "excellent",
        }
    }
}

impl std::fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A raw location report from a field device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocationReport {
    /// Force identifier
    pub id: String,
    /// Reported latitude (degrees)
    pub latitude: f64,
    /// Reported longitude (degrees)
    pub longitude: f64,
    /// Client timestamp, milliseconds since the epoch
    #[cfg_attr(feature = "serde", serde(rename = "timestamp"))]
    pub timestamp_ms: i64,
    /// Force type (e.g. "infantry", "medic")
    #[cfg_attr(feature = "serde", serde(rename = "type", default))]
    pub force_type: String,
    /// Display name
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: String,
    /// Signal level 0-4
    #[cfg_attr(feature = "serde", serde(rename = "signalStrength", default))]
    pub signal_strength: u8,
}

impl LocationReport {
    /// Report with empty metadata and no signal.
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64, timestamp_ms: i64) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            timestamp_ms,
            force_type: String::new(),
            name: String::new(),
            signal_strength: 0,
        }
    }

    /// Set the force type
    pub fn with_type(mut self, force_type: impl Into<String>) -> Self {
        self.force_type = force_type.into();
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the signal level
    pub fn with_signal(mut self, level: u8) -> Self {
        self.signal_strength = level;
        self
    }
}

/// Directory record for one force.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ForceSnapshot {
    /// Force identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Force type
    pub force_type: String,
    /// Last raw latitude
    pub latitude: f64,
    /// Last raw longitude
    pub longitude: f64,
    /// Filtered state [lat, lon, v_lat, v_lon]
    pub estimate: [f64; 4],
    /// Variance of the filtered position
    pub position_variance: [f64; 2],
    /// Client timestamp the filter has advanced to (ms)
    pub timestamp_ms: i64,
    /// Server time the latest report was received (ms)
    pub received_ms: i64,
    /// Identifies the filter instance; a removed and re-created force gets a new one
    pub generation: u64,
    /// Reports accepted by the current filter instance
    pub reports: u64,
    /// Reported signal quality
    pub signal: SignalStrength,
    /// False once the force has been silent past the disconnect threshold
    pub connected: bool,
    /// Dead zones containing the filtered position
    pub dead_zones: Vec<String>,
}

impl ForceSnapshot {
    /// Filtered position [lat, lon].
    pub fn filtered_position(&self) -> [f64; 2] {
        [self.estimate[0], self.estimate[1]]
    }

    /// True if nothing was received for longer than `threshold_ms` at `now_ms`.
    pub fn is_stale(&self, now_ms: i64, threshold_ms: i64) -> bool {
        now_ms.saturating_sub(self.received_ms) > threshold_ms
    }

    /// True if `self` comes from a later filter update than `other`.
    pub(crate) fn supersedes(&self, other: &ForceSnapshot) -> bool {
        (self.generation, self.reports) >= (other.generation, other.reports)
    }
}
