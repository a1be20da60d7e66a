//! Tokio runtime gauges (`SPEC_FULL.md` §3.1): pure ambient operational visibility,
//! carried alongside the request-serving instruments the way the teacher always ships
//! `RuntimeMetrics` next to HTTP metrics.

use opentelemetry::metrics::{Meter, ObservableGauge};

use crate::{errors::CatalogError, names::name};

const SUBSYSTEM: &str = "system";

/// Observable gauges reporting the host process's Tokio runtime occupancy.
#[derive(Clone, Debug)]
pub struct RuntimeMetrics {
    #[allow(dead_code)]
    workers: ObservableGauge<u64>,
    #[allow(dead_code)]
    alive_tasks: ObservableGauge<u64>,
    #[allow(dead_code)]
    global_queue_depth: ObservableGauge<u64>,
}

impl RuntimeMetrics {
    pub(super) fn build(meter: &Meter) -> Result<Self, CatalogError> {
        let workers = meter
            .u64_observable_gauge(name(SUBSYSTEM, "runtime_workers"))
            .with_description("Number of worker threads used by the Tokio runtime.")
            .build();
        let cb_workers = workers.clone();
        meter
            .register_callback(&[workers.as_any()], move |observer| {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    observer.observe_u64(&cb_workers, handle.metrics().num_workers() as u64, &[]);
                }
            })
            .map_err(|source| CatalogError::CallbackRegistration {
                callback: "runtime_workers",
                source,
            })?;

        let alive_tasks = meter
            .u64_observable_gauge(name(SUBSYSTEM, "runtime_alive_tasks"))
            .with_description("Number of tasks currently alive on the Tokio runtime.")
            .build();
        let cb_alive_tasks = alive_tasks.clone();
        meter
            .register_callback(&[alive_tasks.as_any()], move |observer| {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    observer.observe_u64(&cb_alive_tasks, handle.metrics().num_alive_tasks() as u64, &[]);
                }
            })
            .map_err(|source| CatalogError::CallbackRegistration {
                callback: "runtime_alive_tasks",
                source,
            })?;

        // `global_queue_depth` is only available under the `tokio_unstable` cfg; the
        // gauge is still registered unconditionally so scrapers see a stable metric
        // set, it simply never reports a sample when the flag is absent.
        let global_queue_depth = meter
            .u64_observable_gauge(name(SUBSYSTEM, "runtime_global_queue_depth"))
            .with_description("Number of tasks queued on the Tokio runtime's global injection queue.")
            .build();
        let cb_global_queue_depth = global_queue_depth.clone();
        meter
            .register_callback(&[global_queue_depth.as_any()], move |observer| {
                #[cfg(tokio_unstable)]
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    observer.observe_u64(&cb_global_queue_depth, handle.metrics().global_queue_depth() as u64, &[]);
                }
                #[cfg(not(tokio_unstable))]
                let _ = &cb_global_queue_depth;
            })
            .map_err(|source| CatalogError::CallbackRegistration {
                callback: "runtime_global_queue_depth",
                source,
            })?;

        Ok(Self {
            workers,
            alive_tasks,
            global_queue_depth,
        })
    }

    pub(super) fn noop() -> Self {
        Self::build(super::noop_meter()).expect("no-op meter never fails to register callbacks")
    }
}
