//! Dispatcher health store: a concurrent map of dispatcher id → health record, with
//! derived healthy/stale state recomputed on read and exported through an observable
//! callback registered by [`crate::catalog`].

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::Mutex;

/// Default staleness threshold used when a caller registers a dispatcher with a
/// non-positive threshold.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
struct Record {
    last_heartbeat: Instant,
    stale_threshold: Duration,
    is_healthy: bool,
    consecutive_failures: u64,
}

impl Record {
    fn new(stale_threshold: Duration) -> Self {
        Self {
            last_heartbeat: Instant::now(),
            stale_threshold,
            is_healthy: true,
            consecutive_failures: 0,
        }
    }

    /// Recompute `is_healthy`/`consecutive_failures` against the current instant.
    ///
    /// A healthy→unhealthy transition resets `consecutive_failures` to 1; a continued
    /// unhealthy observation increments it; any healthy observation resets it to 0.
    fn refresh(&mut self, now: Instant) {
        let is_stale = now.saturating_duration_since(self.last_heartbeat) > self.stale_threshold;
        if is_stale {
            self.consecutive_failures = if self.is_healthy {
                1
            } else {
                self.consecutive_failures.saturating_add(1)
            };
        } else {
            self.consecutive_failures = 0;
        }
        self.is_healthy = !is_stale;
    }

    fn heartbeat_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat)
    }
}

/// A point-in-time, read-only view of one dispatcher's health, refreshed against
/// "now" at the moment it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherHealth {
    /// Dispatcher id.
    pub id: String,
    /// Whether the dispatcher is currently considered healthy (`= !is_stale`).
    pub is_healthy: bool,
    /// Seconds since the dispatcher's last heartbeat.
    pub heartbeat_age_seconds: f64,
    /// Consecutive stale observations since the dispatcher last transitioned healthy.
    pub consecutive_failures: u64,
}

/// Snapshot shape consumed by the observable-gauge callback in
/// [`crate::catalog::dispatcher`] — identical fields to [`DispatcherHealth`], kept as a
/// distinct type so the catalog module doesn't need to depend on this module's public
/// API surface beyond what the callback needs.
pub(crate) type CallbackSnapshot = DispatcherHealth;

/// Concurrent store of dispatcher health records.
///
/// Cheap to clone: internally an `Arc`-free `DashMap` wrapped for value semantics is
/// avoided in favor of sharing the map directly, since `DashMap` is itself safe to
/// clone-share via an `Arc`.
#[derive(Clone, Debug)]
pub struct DispatcherStore {
    records: Arc<DashMap<String, Mutex<Record>>>,
    reset_lock: Arc<Mutex<()>>,
}

impl Default for DispatcherStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            reset_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Register a dispatcher. A non-positive `stale_threshold` is replaced by
    /// [`DEFAULT_STALE_THRESHOLD`].
    pub fn register(&self, id: impl Into<String>, stale_threshold: Duration) {
        let threshold = if stale_threshold.is_zero() {
            DEFAULT_STALE_THRESHOLD
        } else {
            stale_threshold
        };
        self.records.insert(id.into(), Mutex::new(Record::new(threshold)));
    }

    /// Remove a dispatcher's record. No-op if unknown.
    pub fn unregister(&self, id: &str) {
        self.records.remove(id);
    }

    /// Atomically reset a dispatcher's heartbeat to now, marking it healthy with zero
    /// consecutive failures. No-op for unknown ids.
    pub fn update_heartbeat(&self, id: &str) {
        if let Some(entry) = self.records.get(id) {
            let mut record = entry.lock();
            record.last_heartbeat = Instant::now();
            record.is_healthy = true;
            record.consecutive_failures = 0;
        }
    }

    /// Look up a dispatcher's current health, refreshing derived state first.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<DispatcherHealth> {
        let entry = self.records.get(id)?;
        let now = Instant::now();
        let mut record = entry.lock();
        record.refresh(now);
        Some(DispatcherHealth {
            id: id.to_string(),
            is_healthy: record.is_healthy,
            heartbeat_age_seconds: record.heartbeat_age(now).as_secs_f64(),
            consecutive_failures: record.consecutive_failures,
        })
    }

    /// Snapshot every dispatcher's current health, refreshing derived state for each.
    /// The returned snapshot does not observe later mutation of the store.
    #[must_use]
    pub fn all(&self) -> Vec<DispatcherHealth> {
        let now = Instant::now();
        self.records
            .iter()
            .map(|entry| {
                let id = entry.key().clone();
                let mut record = entry.value().lock();
                record.refresh(now);
                DispatcherHealth {
                    id,
                    is_healthy: record.is_healthy,
                    heartbeat_age_seconds: record.heartbeat_age(now).as_secs_f64(),
                    consecutive_failures: record.consecutive_failures,
                }
            })
            .collect()
    }

    /// Count dispatchers currently healthy, after refreshing derived state.
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.all().iter().filter(|h| h.is_healthy).count()
    }

    /// Count dispatchers currently stale, after refreshing derived state.
    #[must_use]
    pub fn stale_count(&self) -> usize {
        self.all().iter().filter(|h| !h.is_healthy).count()
    }

    /// Snapshot used by the observable-gauge callback. Tolerates concurrent mutation
    /// by iterating the underlying `DashMap`'s shard locks one at a time, never
    /// holding more than one record lock and one shard lock simultaneously.
    pub(crate) fn snapshot_for_callback(&self) -> Vec<CallbackSnapshot> {
        self.all()
    }

    /// Clear every record and serialize concurrent resets behind a dedicated lock.
    /// Intended for test teardown between cases that share a store.
    pub fn reset(&self) {
        let _guard = self.reset_lock.lock();
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn register_unregister_round_trips() {
        let store = DispatcherStore::new();
        store.register("d1", Duration::from_secs(60));
        assert!(store.get("d1").is_some());
        store.unregister("d1");
        assert!(store.get("d1").is_none());
    }

    #[test]
    fn non_positive_threshold_uses_default() {
        let store = DispatcherStore::new();
        store.register("d1", Duration::ZERO);
        let health = store.get("d1").unwrap();
        assert!(health.is_healthy);
    }

    #[test]
    fn stale_transition_and_recovery() {
        let store = DispatcherStore::new();
        store.register("d1", Duration::from_millis(50));
        sleep(Duration::from_millis(80));
        let health = store.get("d1").unwrap();
        assert!(!health.is_healthy);
        assert_eq!(health.consecutive_failures, 1);

        sleep(Duration::from_millis(80));
        let health = store.get("d1").unwrap();
        assert!(!health.is_healthy);
        assert_eq!(health.consecutive_failures, 2);

        store.update_heartbeat("d1");
        let health = store.get("d1").unwrap();
        assert!(health.is_healthy);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn update_heartbeat_is_noop_for_unknown_id() {
        let store = DispatcherStore::new();
        store.update_heartbeat("missing");
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn counts_reflect_refreshed_state() {
        let store = DispatcherStore::new();
        store.register("healthy", Duration::from_secs(60));
        store.register("stale", Duration::from_millis(10));
        sleep(Duration::from_millis(40));
        assert_eq!(store.healthy_count(), 1);
        assert_eq!(store.stale_count(), 1);
    }

    #[test]
    fn reset_clears_all_records() {
        let store = DispatcherStore::new();
        store.register("d1", Duration::from_secs(60));
        store.reset();
        assert!(store.all().is_empty());
    }

    #[test]
    fn all_snapshot_does_not_alias_store() {
        let store = DispatcherStore::new();
        store.register("d1", Duration::from_secs(60));
        let mut snapshot = store.all();
        snapshot[0].is_healthy = false;
        assert!(store.get("d1").unwrap().is_healthy);
    }
}
