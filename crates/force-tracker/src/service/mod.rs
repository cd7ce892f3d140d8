//! Force tracking service.
//!
//! [`ForceService`] is the handle front ends hold on to. It routes location
//! reports through the [`EstimatorRegistry`], keeps the latest record for
//! every force in a [`ForceDirectory`], resolves dead zones, and publishes
//! [`ForceEvent`]s to subscribers.

pub mod dead_zones;
pub mod directory;
pub mod events;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

pub use dead_zones::DeadZoneRegistry;
pub use directory::ForceDirectory;
pub use events::ForceEvent;

use crate::config::TrackerConfig;
use crate::domain::{ForceSnapshot, LocationReport, SignalStrength};
use crate::tracking::{EstimatorRegistry, TrackEstimate};
use crate::{Result, TrackingError};

/// Shared force tracking state.
///
/// Cloning is cheap; all clones see the same forces.
#[derive(Clone)]
pub struct ForceService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    /// Per-force filters
    registry: EstimatorRegistry,
    /// Latest record per force
    directory: ForceDirectory,
    /// Known dead zones
    dead_zones: DeadZoneRegistry,
    /// Change notifications
    broadcast_tx: broadcast::Sender<ForceEvent>,
    config: TrackerConfig,
}

impl ForceService {
    /// Create a service with `config`.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        let registry = EstimatorRegistry::new(config.filter.clone())?;
        let (broadcast_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));

        Ok(Self {
            inner: Arc::new(ServiceInner {
                registry,
                directory: ForceDirectory::new(),
                dead_zones: DeadZoneRegistry::new(),
                broadcast_tx,
                config,
            }),
        })
    }

    /// Create a service with the default configuration.
    pub fn with_defaults() -> Self {
        let config = TrackerConfig::default();
        let (broadcast_tx, _) = broadcast::channel(config.broadcast_capacity);

        Self {
            inner: Arc::new(ServiceInner {
                registry: EstimatorRegistry::with_defaults(),
                directory: ForceDirectory::new(),
                dead_zones: DeadZoneRegistry::new(),
                broadcast_tx,
                config,
            }),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Accept a location report received now.
    pub fn report(&self, report: LocationReport) -> Result<ForceSnapshot> {
        self.report_at(report, chrono::Utc::now().timestamp_millis())
    }

    /// Accept a location report received at server time `received_ms`.
    ///
    /// The report is filtered, the force's directory record is replaced
    /// (and marked connected), and an [`ForceEvent::Updated`] is published.
    /// A rejected report changes nothing.
    pub fn report_at(&self, report: LocationReport, received_ms: i64) -> Result<ForceSnapshot> {
        let checked = Self::check_report(&report).and_then(|signal| {
            self.inner
                .registry
                .observe(&report.id, report.latitude, report.longitude, report.timestamp_ms)
                .map(|estimate| (signal, estimate))
        });
        let (signal, estimate) = match checked {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(force_id = %report.id, error = %e, "Rejected location report");
                return Err(e);
            }
        };

        let generation = estimate.generation;
        let snapshot = self.build_snapshot(report, signal, estimate, received_ms);
        // Only publish while the filter that produced the snapshot is still
        // registered; `remove` holds the directory lock across both maps.
        self.inner.directory.upsert_if(
            snapshot.clone(),
            || self.inner.registry.generation(&snapshot.id) == Some(generation),
            |stored| self.broadcast(ForceEvent::Updated(stored.clone())),
        );
        Ok(snapshot)
    }

    fn check_report(report: &LocationReport) -> Result<SignalStrength> {
        if report.id.trim().is_empty() {
            return Err(TrackingError::InvalidInput(
                "force id must not be empty".to_string(),
            ));
        }
        SignalStrength::from_level(report.signal_strength)
    }

    fn build_snapshot(
        &self,
        report: LocationReport,
        signal: SignalStrength,
        estimate: TrackEstimate,
        received_ms: i64,
    ) -> ForceSnapshot {
        let mut snapshot = ForceSnapshot {
            id: report.id,
            name: report.name,
            force_type: report.force_type,
            latitude: report.latitude,
            longitude: report.longitude,
            estimate: estimate.state,
            position_variance: estimate.position_variance,
            timestamp_ms: estimate.timestamp_ms,
            received_ms,
            generation: estimate.generation,
            reports: estimate.reports,
            signal,
            connected: true,
            dead_zones: Vec::new(),
        };

        let [lat, lon] = snapshot.filtered_position();
        snapshot.dead_zones = self
            .inner
            .dead_zones
            .containing(lat, lon)
            .into_iter()
            .map(|z| z.id().to_owned())
            .collect();
        snapshot
    }

    /// Position of `id` extrapolated `horizon_secs` ahead.
    pub fn forecast(&self, id: &str, horizon_secs: f64) -> Result<[f64; 2]> {
        self.inner.registry.forecast(id, horizon_secs)
    }

    // ========================================================================
    // Directory Queries
    // ========================================================================

    /// Latest record for `id`.
    pub fn force(&self, id: &str) -> Option<ForceSnapshot> {
        self.inner.directory.get(id)
    }

    /// All records, ordered by id.
    pub fn forces(&self) -> Vec<ForceSnapshot> {
        self.inner.directory.list()
    }

    /// Records of one force type, ordered by id.
    pub fn forces_by_type(&self, force_type: &str) -> Vec<ForceSnapshot> {
        self.inner.directory.by_type(force_type)
    }

    /// Number of forces per type.
    pub fn count_by_type(&self) -> BTreeMap<String, usize> {
        self.inner.directory.count_by_type()
    }

    /// Number of forces in the directory.
    pub fn force_count(&self) -> usize {
        self.inner.directory.len()
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Forget `id` entirely. A later report starts a fresh filter.
    pub fn remove(&self, id: &str) -> bool {
        // Reports publish under the same lock, so none can slip in between
        // dropping the record and dropping the filter.
        self.inner.directory.remove_with(id, |record| {
            let had_filter = self.inner.registry.remove(id);
            let removed = record.is_some() || had_filter;
            if removed {
                self.broadcast(ForceEvent::Removed { id: id.to_owned() });
            }
            removed
        })
    }

    /// Forget every force. Dead zones are kept.
    pub fn clear(&self) {
        self.inner.directory.clear_with(|count| {
            self.inner.registry.clear();
            tracing::info!(forces = count, "Cleared all forces");
            self.broadcast(ForceEvent::Cleared);
        });
    }

    // ========================================================================
    // Connectivity
    // ========================================================================

    /// Mark forces silent past the disconnect threshold at `now_ms`.
    /// Returns the ids that were connected until now.
    pub fn sweep_disconnected(&self, now_ms: i64) -> Vec<String> {
        let changed = self
            .inner
            .directory
            .mark_disconnected(now_ms, self.inner.config.disconnect_after_ms);
        if !changed.is_empty() {
            tracing::info!(
                disconnected = changed.len(),
                total = self.inner.directory.len(),
                "Marked silent forces as disconnected"
            );
        }
        for id in &changed {
            self.broadcast(ForceEvent::Disconnected { id: id.clone() });
        }
        changed
    }

    /// Run [`sweep_disconnected`](Self::sweep_disconnected) against the wall
    /// clock every `staleness_check_interval_ms`. Never returns; spawn it and
    /// abort the task to stop.
    pub async fn run_staleness_monitor(self) {
        let period = Duration::from_millis(self.inner.config.staleness_check_interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(period_ms = period.as_millis() as u64, "Staleness monitor started");

        loop {
            ticker.tick().await;
            self.sweep_disconnected(chrono::Utc::now().timestamp_millis());
        }
    }

    // ========================================================================
    // Dead Zones
    // ========================================================================

    /// Dead-zone registry used to annotate forces.
    pub fn dead_zones(&self) -> &DeadZoneRegistry {
        &self.inner.dead_zones
    }

    /// Per-force filter registry.
    pub fn registry(&self) -> &EstimatorRegistry {
        &self.inner.registry
    }

    // ========================================================================
    // Broadcasting
    // ========================================================================

    /// Receiver for change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ForceEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }

    fn broadcast(&self, event: ForceEvent) {
        // No subscribers is not an error
        let _ = self.inner.broadcast_tx.send(event);
    }
}

impl Default for ForceService {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeadZone;

    fn report(id: &str, lat: f64, lon: f64, ts: i64) -> LocationReport {
        LocationReport::new(id, lat, lon, ts)
            .with_type("infantry")
            .with_name(id.to_uppercase())
            .with_signal(3)
    }

    #[test]
    fn test_report_populates_directory() {
        let service = ForceService::with_defaults();
        let snap = service.report_at(report("a-1", 32.0, 34.8, 0), 5).unwrap();

        assert_eq!(snap.estimate, [32.0, 34.8, 0.0, 0.0]);
        assert_eq!(snap.signal, SignalStrength::Good);
        assert_eq!(snap.received_ms, 5);
        assert!(snap.connected);
        assert_eq!(service.force("a-1"), Some(snap));
        assert_eq!(service.force_count(), 1);
    }

    #[test]
    fn test_rejected_report_changes_nothing() {
        let service = ForceService::with_defaults();
        service.report_at(report("a-1", 32.0, 34.8, 0), 0).unwrap();
        let before = service.force("a-1").unwrap();

        let bad_signal = report("a-1", 32.1, 34.8, 1_000).with_signal(9);
        assert!(matches!(
            service.report_at(bad_signal, 1_000),
            Err(TrackingError::InvalidInput(_))
        ));
        assert!(service.report_at(report("a-1", 91.0, 34.8, 1_000), 1_000).is_err());
        assert!(service.report_at(report("  ", 1.0, 1.0, 0), 0).is_err());

        assert_eq!(service.force("a-1"), Some(before));
        assert_eq!(service.registry().estimate("a-1").unwrap().reports, 1);
        assert_eq!(service.force_count(), 1);
    }

    #[test]
    fn test_queries_by_type() {
        let service = ForceService::with_defaults();
        service.report_at(report("a", 1.0, 1.0, 0), 0).unwrap();
        service.report_at(report("b", 1.0, 1.0, 0), 0).unwrap();
        service
            .report_at(report("m", 1.0, 1.0, 0).with_type("medic"), 0)
            .unwrap();

        assert_eq!(service.forces().len(), 3);
        assert_eq!(service.forces_by_type("infantry").len(), 2);
        let counts = service.count_by_type();
        assert_eq!(counts["infantry"], 2);
        assert_eq!(counts["medic"], 1);
    }

    #[test]
    fn test_remove_drops_filter_too() {
        let service = ForceService::with_defaults();
        service.report_at(report("a", 32.0, 34.8, 0), 0).unwrap();
        service.report_at(report("a", 32.001, 34.8, 10_000), 0).unwrap();

        assert!(service.remove("a"));
        assert!(!service.remove("a"));
        assert!(service.force("a").is_none());
        assert!(matches!(
            service.forecast("a", 10.0),
            Err(TrackingError::UnknownEntity(_))
        ));

        let fresh = service.report_at(report("a", 10.0, 10.0, 20_000), 0).unwrap();
        assert_eq!(fresh.estimate, [10.0, 10.0, 0.0, 0.0]);
        assert_eq!(fresh.reports, 1);
    }

    #[test]
    fn test_clear_keeps_dead_zones() {
        let service = ForceService::with_defaults();
        service
            .dead_zones()
            .upsert(DeadZone::new("dz", "Ravine", 32.0, 34.8, 500.0).unwrap());
        service.report_at(report("a", 32.0, 34.8, 0), 0).unwrap();
        service.report_at(report("b", 10.0, 10.0, 0), 0).unwrap();

        service.clear();
        assert_eq!(service.force_count(), 0);
        assert!(service.registry().is_empty());
        assert_eq!(service.dead_zones().len(), 1);
    }

    #[test]
    fn test_dead_zones_follow_filtered_position() {
        let service = ForceService::with_defaults();
        service
            .dead_zones()
            .upsert(DeadZone::new("dz", "Ravine", 32.0, 34.8, 500.0).unwrap());

        let inside = service.report_at(report("a", 32.001, 34.8, 0), 0).unwrap();
        assert_eq!(inside.dead_zones, ["dz"]);
        let outside = service.report_at(report("b", 33.0, 34.8, 0), 0).unwrap();
        assert!(outside.dead_zones.is_empty());
    }

    #[test]
    fn test_sweep_marks_silent_forces() {
        let config = TrackerConfig::builder().disconnect_after_ms(30_000).build();
        let service = ForceService::new(config).unwrap();
        service.report_at(report("quiet", 1.0, 1.0, 0), 0).unwrap();
        service.report_at(report("busy", 2.0, 2.0, 0), 20_000).unwrap();

        assert_eq!(service.sweep_disconnected(40_000), vec!["quiet"]);
        assert!(!service.force("quiet").unwrap().connected);
        assert!(service.sweep_disconnected(40_000).is_empty());

        // A new report reconnects the force
        let back = service.report_at(report("quiet", 1.0, 1.0, 45_000), 45_000).unwrap();
        assert!(back.connected);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = TrackerConfig::default();
        config.filter.measurement_noise = [-1.0, 10.0];
        assert!(matches!(
            ForceService::new(config),
            Err(TrackingError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let service = ForceService::with_defaults();
        let mut rx = service.subscribe();
        assert_eq!(service.subscriber_count(), 1);

        service.report_at(report("a", 32.0, 34.8, 0), 0).unwrap();
        service.sweep_disconnected(i64::MAX);
        service.remove("a");
        service.clear();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ForceEvent::Updated(_)));
        assert_eq!(first.force_id(), Some("a"));
        assert_eq!(
            rx.recv().await.unwrap(),
            ForceEvent::Disconnected { id: "a".into() }
        );
        assert_eq!(rx.recv().await.unwrap(), ForceEvent::Removed { id: "a".into() });
        let cleared = rx.recv().await.unwrap();
        assert_eq!(cleared, ForceEvent::Cleared);
        assert_eq!(cleared.force_id(), None);
    }

    #[test]
    fn test_remove_racing_report_leaves_no_orphan() {
        use std::sync::Barrier;

        let service = ForceService::with_defaults();
        for round in 0..500i64 {
            service.report_at(report("x", 32.0, 34.8, 0), 0).unwrap();
            let barrier = Barrier::new(2);

            std::thread::scope(|s| {
                s.spawn(|| {
                    barrier.wait();
                    service
                        .report_at(report("x", 32.001, 34.8, 1_000), 1_000)
                        .unwrap();
                });
                s.spawn(|| {
                    barrier.wait();
                    service.remove("x");
                });
            });

            assert_eq!(
                service.force("x").is_some(),
                service.registry().contains("x"),
                "round {round}: directory and registry disagree"
            );
            if service.force("x").is_some() {
                assert!(service.forecast("x", 10.0).is_ok());
            }
            service.remove("x");
        }
    }

    #[test]
    fn test_report_for_removed_filter_not_published() {
        let service = ForceService::with_defaults();
        service.report_at(report("x", 32.0, 34.8, 0), 0).unwrap();
        let stale = service.registry().estimate("x").unwrap();
        service.remove("x");

        let snap = service.build_snapshot(
            report("x", 32.0, 34.8, 0),
            SignalStrength::None,
            stale.clone(),
            0,
        );
        let generation = stale.generation;
        let mut rx = service.subscribe();
        let stored = service.inner.directory.upsert_if(
            snap,
            || service.registry().generation("x") == Some(generation),
            |stored| service.broadcast(ForceEvent::Updated(stored.clone())),
        );
        assert!(!stored);
        assert!(service.force("x").is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_staleness_monitor_disconnects() {
        let config = TrackerConfig::builder()
            .disconnect_after_ms(1_000)
            .staleness_check_interval_ms(100)
            .build();
        let service = ForceService::new(config).unwrap();
        let long_ago = chrono::Utc::now().timestamp_millis() - 60_000;
        service.report_at(report("a", 1.0, 1.0, 0), long_ago).unwrap();

        let mut rx = service.subscribe();
        let monitor = tokio::spawn(service.clone().run_staleness_monitor());

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("monitor did not run")
            .unwrap();
        assert_eq!(event, ForceEvent::Disconnected { id: "a".into() });
        assert!(!service.force("a").unwrap().connected);

        monitor.abort();
    }
}
