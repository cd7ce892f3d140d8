//! Dead zones: circular areas with no reliable coverage.

use geo::{HaversineDistance, Point};

use crate::{tracking::registry::validate_coordinates, Result, TrackingError};

/// A circular dead zone on the Earth's surface.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeadZone {
    id: String,
    name: String,
    /// Centre as (x = longitude, y = latitude)
    center: Point<f64>,
    radius_m: f64,
}

impl DeadZone {
    /// Create a dead zone centred on (`latitude`, `longitude`).
    ///
    /// The centre must be a valid geographic coordinate and the radius
    /// finite and non-negative.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        latitude: f64,
        longitude: f64,
        radius_m: f64,
    ) -> Result<Self> {
        validate_coordinates(latitude, longitude)?;
        if !radius_m.is_finite() || radius_m < 0.0 {
            return Err(TrackingError::InvalidInput(format!(
                "dead zone radius must be finite and non-negative, got {radius_m}"
            )));
        }
        Ok(Self {
            id: id.into(),
            name: name.into(),
            center: Point::new(longitude, latitude),
            radius_m,
        })
    }

    /// Zone identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Centre latitude
    pub fn latitude(&self) -> f64 {
        self.center.y()
    }

    /// Centre longitude
    pub fn longitude(&self) -> f64 {
        self.center.x()
    }

    /// Radius in metres
    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    /// Great-circle distance from the centre to a point, in metres.
    pub fn distance_m(&self, latitude: f64, longitude: f64) -> f64 {
        self.center
            .haversine_distance(&Point::new(longitude, latitude))
    }

    /// True if the point lies within the radius (boundary inclusive).
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        self.distance_m(latitude, longitude) <= self.radius_m
    }
}
