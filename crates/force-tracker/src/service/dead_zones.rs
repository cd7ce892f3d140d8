//! Registry of known dead zones.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::DeadZone;

/// Thread-safe id → [`DeadZone`] map.
#[derive(Debug, Default)]
pub struct DeadZoneRegistry {
    zones: RwLock<HashMap<String, DeadZone>>,
}

impl DeadZoneRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a zone, replacing any zone with the same id.
    /// Returns the replaced zone.
    pub fn upsert(&self, zone: DeadZone) -> Option<DeadZone> {
        let previous = self.zones.write().insert(zone.id().to_owned(), zone);
        if let Some(ref old) = previous {
            tracing::debug!(zone_id = %old.id(), "Replaced dead zone");
        }
        previous
    }

    /// Zone with id `id`
    pub fn get(&self, id: &str) -> Option<DeadZone> {
        self.zones.read().get(id).cloned()
    }

    /// All zones, ordered by id.
    pub fn list(&self) -> Vec<DeadZone> {
        let mut all: Vec<_> = self.zones.read().values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Remove the zone with id `id`
    pub fn remove(&self, id: &str) -> Option<DeadZone> {
        self.zones.write().remove(id)
    }

    /// Remove every zone
    pub fn clear(&self) {
        self.zones.write().clear();
    }

    /// Number of zones
    pub fn len(&self) -> usize {
        self.zones.read().len()
    }

    /// True if there are no zones
    pub fn is_empty(&self) -> bool {
        self.zones.read().is_empty()
    }

    /// Zones containing the point, ordered by id.
    pub fn containing(&self, latitude: f64, longitude: f64) -> Vec<DeadZone> {
        let mut hits: Vec<_> = self
            .zones
            .read()
            .values()
            .filter(|z| z.contains(latitude, longitude))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.id().cmp(b.id()));
        hits
    }
}
