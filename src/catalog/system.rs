//! System-level instruments: `build_info` and `uptime_seconds`.

use std::time::Instant;

use opentelemetry::metrics::{Meter, ObservableGauge};

use super::execution::kv;
use crate::{buildinfo::BuildInfo, errors::CatalogError, names::name};

const SUBSYSTEM: &str = "system";

/// Instruments reporting process build metadata and uptime.
#[derive(Clone, Debug)]
pub struct SystemMetrics {
    #[allow(dead_code)]
    build_info: ObservableGauge<u64>,
    #[allow(dead_code)]
    uptime: ObservableGauge<f64>,
}

impl SystemMetrics {
    pub(super) fn build(meter: &Meter, build_info: BuildInfo, start_time: Instant) -> Result<Self, CatalogError> {
        let gauge = meter
            .u64_observable_gauge(name(SUBSYSTEM, "build_info"))
            .with_description("Always 1; labels carry build version/commit/toolchain.")
            .build();
        let cb_gauge = gauge.clone();
        let cb_build_info = build_info.clone();
        meter
            .register_callback(&[gauge.as_any()], move |observer| {
                let (version, commit_hash, go_version) = cb_build_info.current();
                observer.observe_u64(
                    &cb_gauge,
                    1,
                    &[
                        kv("version", &version),
                        kv("commit_hash", &commit_hash),
                        kv("go_version", &go_version),
                    ],
                );
            })
            .map_err(|source| CatalogError::CallbackRegistration {
                callback: "build_info",
                source,
            })?;

        let uptime = meter
            .f64_observable_gauge(name(SUBSYSTEM, "uptime_seconds"))
            .with_description("Seconds since the monitoring service was enabled.")
            .build();
        let cb_uptime = uptime.clone();
        meter
            .register_callback(&[uptime.as_any()], move |observer| {
                observer.observe_f64(&cb_uptime, start_time.elapsed().as_secs_f64(), &[]);
            })
            .map_err(|source| CatalogError::CallbackRegistration {
                callback: "uptime",
                source,
            })?;

        Ok(Self {
            build_info: gauge,
            uptime,
        })
    }

    pub(super) fn noop() -> Self {
        Self::build(super::noop_meter(), BuildInfo::defaults(), Instant::now())
            .expect("no-op meter never fails to register callbacks")
    }
}
