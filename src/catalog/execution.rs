//! HTTP-facing "execution" instruments: synchronous task-execution requests and the
//! legacy sync-poll path.

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};

use crate::names::name;

const SUBSYSTEM: &str = "execution";

fn latency_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
    ]
}

/// Instruments recording synchronous task-execution HTTP requests.
#[derive(Clone, Debug)]
pub struct ExecutionMetrics {
    latency: Histogram<f64>,
    timeouts: Counter<u64>,
    errors: Counter<u64>,
    started: Counter<u64>,
    sync_polls: Counter<u64>,
    sync_poll_duration: Histogram<f64>,
}

impl ExecutionMetrics {
    pub(super) fn build(meter: &Meter) -> Self {
        Self {
            latency: meter
                .f64_histogram(name(SUBSYSTEM, "http_exec_sync_latency_seconds"))
                .with_unit("s")
                .with_boundaries(latency_buckets())
                .with_description("Latency of synchronous task-execution HTTP requests.")
                .build(),
            timeouts: meter
                .u64_counter(name(SUBSYSTEM, "http_exec_timeouts_total"))
                .with_description("Synchronous task-execution requests that timed out.")
                .build(),
            errors: meter
                .u64_counter(name(SUBSYSTEM, "http_exec_errors_total"))
                .with_description("Synchronous task-execution requests that errored.")
                .build(),
            started: meter
                .u64_counter(name(SUBSYSTEM, "http_exec_started_total"))
                .with_description("Synchronous task-execution requests started.")
                .build(),
            sync_polls: meter
                .u64_counter(name(SUBSYSTEM, "workflow_sync_polls_total"))
                .with_description("Legacy synchronous status polls performed.")
                .build(),
            sync_poll_duration: meter
                .f64_histogram(name(SUBSYSTEM, "workflow_sync_poll_duration_seconds"))
                .with_unit("s")
                .with_boundaries(latency_buckets())
                .with_description("Duration of legacy synchronous status polls.")
                .build(),
        }
    }

    pub(super) fn noop() -> Self {
        Self::build(super::noop_meter())
    }

    /// Record that a synchronous execution request started.
    pub fn record_started(&self, kind: &str) {
        self.started.add(1, &[kv("kind", kind)]);
    }

    /// Record the outcome and latency of a synchronous execution request.
    pub fn record_latency(&self, kind: &str, outcome: &str, seconds: f64) {
        self.latency.record(seconds, &[kv("kind", kind), kv("outcome", outcome)]);
    }

    /// Record a synchronous execution request timeout.
    pub fn record_timeout(&self, kind: &str) {
        self.timeouts.add(1, &[kv("kind", kind)]);
    }

    /// Record a synchronous execution request error.
    pub fn record_error(&self, kind: &str, code: &str) {
        self.errors.add(1, &[kv("kind", kind), kv("code", code)]);
    }

    /// Record a legacy synchronous status poll.
    pub fn record_sync_poll(&self, outcome: &str, seconds: f64) {
        self.sync_polls.add(1, &[kv("outcome", outcome)]);
        self.sync_poll_duration.record(seconds, &[kv("outcome", outcome)]);
    }
}

pub(super) fn kv(key: &'static str, value: &str) -> KeyValue {
    let value = if value.is_empty() { "unknown" } else { value };
    KeyValue::new(key, value.to_string())
}
