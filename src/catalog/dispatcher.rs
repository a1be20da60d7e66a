//! Dispatcher health (observable) and lifecycle (synchronous) instruments.
//!
//! Health gauges are driven by one callback that scans the dispatcher store once per
//! collection (`spec.md` §4.3: "the callback... MUST never block longer than a single
//! map scan"), registered via [`opentelemetry::metrics::Meter::register_callback`]
//! rather than three independent `.with_callback` closures.

use std::sync::Arc;

use opentelemetry::metrics::{Counter, Histogram, Meter, MetricError, ObservableGauge, UpDownCounter};

use super::execution::kv;
use crate::{dispatcher::DispatcherStore, errors::CatalogError, names::name};

const SUBSYSTEM: &str = "dispatcher";

fn takeover_latency_buckets() -> Vec<f64> {
    vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
}

fn scan_duration_buckets() -> Vec<f64> {
    vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
}

/// Observable gauges derived from [`DispatcherStore`].
#[derive(Clone, Debug)]
pub struct DispatcherHealthInstruments {
    #[allow(dead_code)]
    status: ObservableGauge<u64>,
    #[allow(dead_code)]
    heartbeat_age: ObservableGauge<f64>,
    #[allow(dead_code)]
    consecutive_failures: ObservableGauge<u64>,
}

impl DispatcherHealthInstruments {
    pub(super) fn build(meter: &Meter, store: DispatcherStore) -> Result<Self, CatalogError> {
        let status = meter
            .u64_observable_gauge(name(SUBSYSTEM, "dispatcher_health_status"))
            .with_description("1 if the dispatcher is healthy, 0 if stale.")
            .build();
        let heartbeat_age = meter
            .f64_observable_gauge(name(SUBSYSTEM, "dispatcher_heartbeat_age_seconds"))
            .with_description("Seconds since the dispatcher's last heartbeat.")
            .build();
        let consecutive_failures = meter
            .u64_observable_gauge(name(SUBSYSTEM, "dispatcher_consecutive_failures"))
            .with_description("Consecutive stale observations for the dispatcher.")
            .build();

        let cb_status = status.clone();
        let cb_age = heartbeat_age.clone();
        let cb_failures = consecutive_failures.clone();
        meter
            .register_callback(
                &[status.as_any(), heartbeat_age.as_any(), consecutive_failures.as_any()],
                move |observer| {
                    for snapshot in store.snapshot_for_callback() {
                        let is_stale = if snapshot.is_healthy { "false" } else { "true" };
                        let labels = [kv("dispatcher_id", &snapshot.id), kv("is_stale", is_stale)];
                        observer.observe_u64(&cb_status, u64::from(snapshot.is_healthy), &labels);
                        observer.observe_f64(
                            &cb_age,
                            snapshot.heartbeat_age_seconds,
                            &[kv("dispatcher_id", &snapshot.id)],
                        );
                        observer.observe_u64(
                            &cb_failures,
                            snapshot.consecutive_failures,
                            &[kv("dispatcher_id", &snapshot.id)],
                        );
                    }
                },
            )
            .map_err(|source| CatalogError::CallbackRegistration {
                callback: "dispatcher_health",
                source,
            })?;

        Ok(Self {
            status,
            heartbeat_age,
            consecutive_failures,
        })
    }

    pub(super) fn noop() -> Self {
        Self::build(super::noop_meter(), DispatcherStore::new())
            .expect("no-op meter never fails to register callbacks")
    }
}

/// Counters and histograms recording dispatcher process lifecycle events, recorded by
/// the package-level helpers in [`crate::interceptor::worker`].
#[derive(Clone, Debug)]
pub struct DispatcherLifecycleMetrics {
    active: UpDownCounter<i64>,
    heartbeats: Counter<u64>,
    lifecycle_events: Counter<u64>,
    takeovers: Counter<u64>,
    takeover_latency: Histogram<f64>,
    keys_scanned: Counter<u64>,
    stale_heartbeats: Counter<u64>,
    scan_duration: Histogram<f64>,
    #[allow(dead_code)]
    uptime: ObservableGauge<f64>,
    uptime_tracker: Arc<UptimeTracker>,
}

/// Tracks per-dispatcher start times for the `dispatcher_uptime_seconds` callback.
///
/// Held in a concurrent map (`spec.md` §5: "Dispatcher start-times for uptime are held
/// in a concurrent map").
#[derive(Debug, Default)]
pub(crate) struct UptimeTracker {
    started_at: dashmap::DashMap<String, std::time::Instant>,
}

impl UptimeTracker {
    fn mark_started(&self, id: &str) {
        self.started_at.insert(id.to_string(), std::time::Instant::now());
    }

    fn mark_stopped(&self, id: &str) {
        self.started_at.remove(id);
    }

    fn snapshot(&self) -> Vec<(String, f64)> {
        self.started_at
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().elapsed().as_secs_f64()))
            .collect()
    }
}

impl DispatcherLifecycleMetrics {
    pub(super) fn build(meter: &Meter) -> Result<Self, CatalogError> {
        let active = meter
            .i64_up_down_counter(name(SUBSYSTEM, "dispatcher_active_total"))
            .with_description("Dispatchers currently running in this process.")
            .build();
        let heartbeats = meter
            .u64_counter(name(SUBSYSTEM, "dispatcher_heartbeat_total"))
            .with_description("Heartbeats recorded for dispatchers.")
            .build();
        let lifecycle_events = meter
            .u64_counter(name(SUBSYSTEM, "dispatcher_lifecycle_events_total"))
            .with_description("Dispatcher lifecycle transitions (start/stop/restart).")
            .build();
        let takeovers = meter
            .u64_counter(name(SUBSYSTEM, "dispatcher_takeover_total"))
            .with_description("Dispatcher takeover attempts, by outcome.")
            .build();
        let takeover_latency = meter
            .f64_histogram(name(SUBSYSTEM, "dispatcher_takeover_latency_seconds"))
            .with_unit("s")
            .with_boundaries(takeover_latency_buckets())
            .with_description("Latency of dispatcher takeover attempts.")
            .build();
        let keys_scanned = meter
            .u64_counter(name(SUBSYSTEM, "dispatcher_keys_scanned_total"))
            .with_description("Keys scanned while looking for stale dispatchers.")
            .build();
        let stale_heartbeats = meter
            .u64_counter(name(SUBSYSTEM, "dispatcher_stale_heartbeats_total"))
            .with_description("Stale heartbeats found during a scan.")
            .build();
        let scan_duration = meter
            .f64_histogram(name(SUBSYSTEM, "dispatcher_scan_duration_seconds"))
            .with_unit("s")
            .with_boundaries(scan_duration_buckets())
            .with_description("Duration of a dispatcher staleness scan.")
            .build();

        let uptime_tracker = Arc::new(UptimeTracker::default());
        let cb_tracker = uptime_tracker.clone();
        let uptime = meter
            .f64_observable_gauge(name(SUBSYSTEM, "dispatcher_uptime_seconds"))
            .with_description("Seconds since the dispatcher process started.")
            .build();
        let cb_uptime = uptime.clone();
        meter
            .register_callback(&[uptime.as_any()], move |observer| {
                for (id, seconds) in cb_tracker.snapshot() {
                    observer.observe_f64(&cb_uptime, seconds, &[kv("dispatcher_id", &id)]);
                }
            })
            .map_err(|source| CatalogError::CallbackRegistration {
                callback: "dispatcher_uptime",
                source,
            })?;

        Ok(Self {
            active,
            heartbeats,
            lifecycle_events,
            takeovers,
            takeover_latency,
            keys_scanned,
            stale_heartbeats,
            scan_duration,
            uptime,
            uptime_tracker,
        })
    }

    pub(super) fn noop() -> Self {
        Self::build(super::noop_meter()).expect("no-op meter never fails to register callbacks")
    }

    /// Record a dispatcher starting: increments `active`, marks uptime start, and
    /// records a `start` lifecycle event.
    pub fn start_dispatcher(&self, id: &str) {
        self.active.add(1, &[]);
        self.uptime_tracker.mark_started(id);
        self.lifecycle_events.add(1, &[kv("event", "start")]);
    }

    /// Record a dispatcher stopping.
    pub fn stop_dispatcher(&self, id: &str) {
        self.active.add(-1, &[]);
        self.uptime_tracker.mark_stopped(id);
        self.lifecycle_events.add(1, &[kv("event", "stop")]);
    }

    /// Record a dispatcher restart (stop immediately followed by start).
    pub fn restart_dispatcher(&self) {
        self.lifecycle_events.add(1, &[kv("event", "restart")]);
    }

    /// Record a dispatcher heartbeat.
    pub fn record_heartbeat(&self) {
        self.heartbeats.add(1, &[]);
    }

    /// Record the outcome and latency of a dispatcher takeover attempt.
    pub fn record_takeover(&self, outcome: &str, seconds: f64) {
        self.takeovers.add(1, &[kv("outcome", outcome)]);
        self.takeover_latency.record(seconds, &[]);
    }

    /// Record a staleness scan: keys scanned, stale heartbeats found, and duration.
    pub fn record_scan(&self, keys_scanned: u64, stale_found: u64, seconds: f64) {
        self.keys_scanned.add(keys_scanned, &[]);
        self.stale_heartbeats.add(stale_found, &[]);
        self.scan_duration.record(seconds, &[]);
    }
}
