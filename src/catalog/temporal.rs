//! Workflow-worker instruments (`temporal_*`), recorded by [`crate::interceptor::worker`].

use opentelemetry::metrics::{Counter, Histogram, Meter, ObservableGauge, UpDownCounter};

use super::execution::kv;
use crate::{errors::CatalogError, names::name};

const SUBSYSTEM: &str = "temporal";

fn duration_buckets() -> Vec<f64> {
    vec![
        0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0,
    ]
}

/// Instruments recording workflow worker execution.
#[derive(Clone, Debug)]
pub struct TemporalMetrics {
    started: Counter<u64>,
    completed: Counter<u64>,
    failed: Counter<u64>,
    duration: Histogram<f64>,
    workers_running: UpDownCounter<i64>,
    #[allow(dead_code)]
    workers_configured: ObservableGauge<u64>,
}

impl TemporalMetrics {
    pub(super) fn build<F>(meter: &Meter, configured_workers: F) -> Result<Self, CatalogError>
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        let started = meter
            .u64_counter(name(SUBSYSTEM, "temporal_workflow_started_total"))
            .with_description("Workflow executions started.")
            .build();
        let completed = meter
            .u64_counter(name(SUBSYSTEM, "temporal_workflow_completed_total"))
            .with_description("Workflow executions completed successfully.")
            .build();
        let failed = meter
            .u64_counter(name(SUBSYSTEM, "temporal_workflow_failed_total"))
            .with_description("Workflow executions that did not complete successfully.")
            .build();
        let duration = meter
            .f64_histogram(name(SUBSYSTEM, "temporal_workflow_duration_seconds"))
            .with_unit("s")
            .with_boundaries(duration_buckets())
            .with_description("Workflow execution duration.")
            .build();
        let workers_running = meter
            .i64_up_down_counter(name(SUBSYSTEM, "temporal_workers_running_total"))
            .with_description("Workflow workers currently running.")
            .build();
        let workers_configured = meter
            .u64_observable_gauge(name(SUBSYSTEM, "temporal_workers_configured_total"))
            .with_description("Workflow workers configured to run.")
            .with_callback(move |observer| observer.observe(configured_workers(), &[]))
            .build();

        Ok(Self {
            started,
            completed,
            failed,
            duration,
            workers_running,
            workers_configured,
        })
    }

    pub(super) fn noop() -> Self {
        Self::build(super::noop_meter(), || 0).expect("with_callback never fails to register")
    }

    /// Record that a workflow execution started.
    pub fn record_started(&self, workflow_type: &str) {
        self.started.add(1, &[kv("workflow_type", workflow_type)]);
    }

    /// Record the completion of a workflow execution.
    ///
    /// `result` must be one of `completed`, `canceled`, `timeout`, `failed`.
    pub fn record_completion(&self, workflow_type: &str, result: &str, seconds: f64) {
        let labels = [kv("workflow_type", workflow_type), kv("result", result)];
        self.duration.record(seconds, &labels);
        if result == "completed" {
            self.completed.add(1, &[kv("workflow_type", workflow_type)]);
        } else {
            self.failed.add(1, &labels);
        }
    }

    /// Record a worker starting or stopping.
    pub fn record_worker_delta(&self, delta: i64) {
        self.workers_running.add(delta, &[]);
    }
}
