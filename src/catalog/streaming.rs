//! SSE streaming instruments (`stream_*`), shared by both structured and text streams.

use opentelemetry::metrics::{Histogram, Meter, UpDownCounter};

use super::execution::kv;
use crate::names::name;

const SUBSYSTEM: &str = "streaming";

fn connection_duration_buckets() -> Vec<f64> {
    vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
}

fn time_to_first_event_buckets() -> Vec<f64> {
    vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
}

/// Instruments recording SSE stream lifecycle and event traffic.
#[derive(Clone, Debug)]
pub struct StreamingMetrics {
    active_connections: UpDownCounter<i64>,
    connection_duration: Histogram<f64>,
    time_to_first_event: Histogram<f64>,
    events: opentelemetry::metrics::Counter<u64>,
    errors: opentelemetry::metrics::Counter<u64>,
}

impl StreamingMetrics {
    pub(super) fn build(meter: &Meter) -> Self {
        Self {
            active_connections: meter
                .i64_up_down_counter(name(SUBSYSTEM, "stream_active_connections"))
                .with_description("Currently open task-execution SSE streams.")
                .build(),
            connection_duration: meter
                .f64_histogram(name(SUBSYSTEM, "stream_connection_duration_seconds"))
                .with_unit("s")
                .with_boundaries(connection_duration_buckets())
                .with_description("Lifetime of a task-execution SSE stream.")
                .build(),
            time_to_first_event: meter
                .f64_histogram(name(SUBSYSTEM, "stream_time_to_first_event_seconds"))
                .with_unit("s")
                .with_boundaries(time_to_first_event_buckets())
                .with_description("Time from connect to the first non-heartbeat event.")
                .build(),
            events: meter
                .u64_counter(name(SUBSYSTEM, "stream_events_total"))
                .with_description("SSE events emitted, by stream kind and event type.")
                .build(),
            errors: meter
                .u64_counter(name(SUBSYSTEM, "stream_errors_total"))
                .with_description("SSE stream errors, by stream kind and close-reason phase.")
                .build(),
        }
    }

    pub(super) fn noop() -> Self {
        Self::build(super::noop_meter())
    }

    /// Record a newly opened stream.
    pub fn record_connect(&self, kind: &str) {
        self.active_connections.add(1, &[kv("kind", kind)]);
    }

    /// Record the time from connect to the first non-heartbeat event.
    pub fn record_time_to_first_event(&self, kind: &str, seconds: f64) {
        self.time_to_first_event.record(seconds, &[kv("kind", kind)]);
    }

    /// Record one emitted event.
    pub fn record_event(&self, kind: &str, event_type: &str) {
        self.events.add(1, &[kv("kind", kind), kv("event_type", event_type)]);
    }

    /// Record a stream error, keyed by close-reason phase.
    pub fn record_error(&self, kind: &str, reason: &str) {
        self.errors.add(1, &[kv("kind", kind), kv("reason", reason)]);
    }

    /// Record stream close: decrement active connections and record total duration.
    pub fn record_close(&self, kind: &str, duration_seconds: f64) {
        self.active_connections.add(-1, &[kv("kind", kind)]);
        self.connection_duration.record(duration_seconds, &[kv("kind", kind)]);
    }
}
