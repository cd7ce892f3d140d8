//! Latest known record for every force.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::domain::ForceSnapshot;

/// Thread-safe id → [`ForceSnapshot`] map.
#[derive(Debug, Default)]
pub struct ForceDirectory {
    forces: RwLock<HashMap<String, ForceSnapshot>>,
}

impl ForceDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot` unless the directory already holds a later update
    /// for the same force. Returns `true` if the snapshot was stored.
    pub fn upsert(&self, snapshot: ForceSnapshot) -> bool {
        self.upsert_if(snapshot, || true, |_| {})
    }

    /// Like [`upsert`](Self::upsert), but `still_current` is evaluated under
    /// the directory write lock and a `false` result refuses the snapshot.
    /// `on_stored` runs under the same lock once the snapshot is in place.
    pub fn upsert_if<C, S>(&self, snapshot: ForceSnapshot, still_current: C, on_stored: S) -> bool
    where
        C: FnOnce() -> bool,
        S: FnOnce(&ForceSnapshot),
    {
        let mut forces = self.forces.write();
        if !still_current() {
            return false;
        }
        if let Some(current) = forces.get(&snapshot.id) {
            if !snapshot.supersedes(current) {
                return false;
            }
        }
        on_stored(&snapshot);
        forces.insert(snapshot.id.clone(), snapshot);
        true
    }

    /// Record for `id`
    pub fn get(&self, id: &str) -> Option<ForceSnapshot> {
        self.forces.read().get(id).cloned()
    }

    /// All records, ordered by id.
    pub fn list(&self) -> Vec<ForceSnapshot> {
        let mut all: Vec<_> = self.forces.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Records whose force type equals `force_type`, ordered by id.
    pub fn by_type(&self, force_type: &str) -> Vec<ForceSnapshot> {
        let mut matching: Vec<_> = self
            .forces
            .read()
            .values()
            .filter(|f| f.force_type == force_type)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        matching
    }

    /// Number of records per force type.
    pub fn count_by_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for force in self.forces.read().values() {
            *counts.entry(force.force_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Remove the record for `id`
    pub fn remove(&self, id: &str) -> Option<ForceSnapshot> {
        self.remove_with(id, |removed| removed)
    }

    /// Remove the record for `id` and pass it to `then` while still holding
    /// the write lock.
    pub fn remove_with<R, F>(&self, id: &str, then: F) -> R
    where
        F: FnOnce(Option<ForceSnapshot>) -> R,
    {
        let mut forces = self.forces.write();
        let removed = forces.remove(id);
        then(removed)
    }

    /// Remove every record, returning how many there were.
    pub fn clear(&self) -> usize {
        self.clear_with(|count| count)
    }

    /// Remove every record and pass the count to `then` while still holding
    /// the write lock.
    pub fn clear_with<R, F>(&self, then: F) -> R
    where
        F: FnOnce(usize) -> R,
    {
        let mut forces = self.forces.write();
        let count = forces.len();
        forces.clear();
        then(count)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.forces.read().len()
    }

    /// True if there are no records
    pub fn is_empty(&self) -> bool {
        self.forces.read().is_empty()
    }

    /// Flag every connected force silent for more than `threshold_ms` at
    /// `now_ms` as disconnected. Returns the ids that changed, ordered.
    pub fn mark_disconnected(&self, now_ms: i64, threshold_ms: i64) -> Vec<String> {
        let mut forces = self.forces.write();
        let mut changed: Vec<String> = forces
            .values_mut()
            .filter(|f| f.connected && f.is_stale(now_ms, threshold_ms))
            .map(|f| {
                f.connected = false;
                f.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }
}
