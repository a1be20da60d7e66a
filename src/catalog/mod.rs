//! The metric catalog: one-time construction of every typed instrument this crate
//! defines, grouped by subsystem.
//!
//! [`Catalog`] is owned by a single [`crate::service::MonitoringService`] instance —
//! there is no process-wide catalog singleton (`SPEC_FULL.md` §9 / `DESIGN.md`).
//! [`Catalog::build`] is guarded by a `once_cell::sync::OnceCell` so that repeat calls
//! on the same instance are no-ops, and every accessor is total: before `build` runs
//! (or when the service is disabled), accessors fall back to a shared no-op instrument
//! set built against an unconfigured meter, whose `.add`/`.record` calls discard their
//! input per the OpenTelemetry API contract.

pub mod dispatcher;
pub mod execution;
pub mod llm_usage;
pub mod runtime;
pub mod streaming;
pub mod system;
pub mod temporal;

use std::time::Instant;

use once_cell::sync::{Lazy, OnceCell};
use opentelemetry::metrics::Meter;

use crate::{buildinfo::BuildInfo, dispatcher::DispatcherStore, errors::CatalogError};

pub use dispatcher::{DispatcherHealthInstruments, DispatcherLifecycleMetrics};
pub use execution::ExecutionMetrics;
pub use llm_usage::{LlmProviderMetrics, LlmUsageMetrics};
pub use runtime::RuntimeMetrics;
pub use streaming::StreamingMetrics;
pub use system::SystemMetrics;
pub use temporal::TemporalMetrics;

/// A meter backed by no reader. Instruments built against it accept every
/// `.add`/`.record` call and discard the value, matching the OpenTelemetry API's
/// contract for an unconfigured meter provider. Used to supply the no-op facades the
/// catalog returns before `build` has run.
fn noop_meter() -> &'static Meter {
    static METER: Lazy<Meter> = Lazy::new(|| {
        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().build();
        // Leaked deliberately: this provider backs the process-lifetime no-op facade
        // and is never torn down (there is nothing to flush — no reader is attached).
        let provider: &'static opentelemetry_sdk::metrics::SdkMeterProvider = Box::leak(Box::new(provider));
        provider.meter("workflow-observability/noop")
    });
    &METER
}

static NOOP_INNER: Lazy<CatalogInner> = Lazy::new(CatalogInner::noop);

#[derive(Clone, Debug)]
struct CatalogInner {
    execution: ExecutionMetrics,
    streaming: StreamingMetrics,
    llm_usage: LlmUsageMetrics,
    llm_provider: LlmProviderMetrics,
    dispatcher_health: DispatcherHealthInstruments,
    dispatcher_lifecycle: DispatcherLifecycleMetrics,
    temporal: TemporalMetrics,
    system: SystemMetrics,
    runtime: RuntimeMetrics,
}

impl CatalogInner {
    fn noop() -> Self {
        Self {
            execution: ExecutionMetrics::noop(),
            streaming: StreamingMetrics::noop(),
            llm_usage: LlmUsageMetrics::noop(),
            llm_provider: LlmProviderMetrics::noop(),
            dispatcher_health: DispatcherHealthInstruments::noop(),
            dispatcher_lifecycle: DispatcherLifecycleMetrics::noop(),
            temporal: TemporalMetrics::noop(),
            system: SystemMetrics::noop(),
            runtime: RuntimeMetrics::noop(),
        }
    }

    fn build(
        meter: &Meter,
        dispatcher_store: DispatcherStore,
        build_info: BuildInfo,
        start_time: Instant,
    ) -> Result<Self, CatalogError> {
        let llm_usage = LlmUsageMetrics::build(meter);
        Ok(Self {
            execution: ExecutionMetrics::build(meter),
            streaming: StreamingMetrics::build(meter),
            llm_provider: LlmProviderMetrics::new(llm_usage.clone()),
            llm_usage,
            dispatcher_health: DispatcherHealthInstruments::build(meter, dispatcher_store)?,
            dispatcher_lifecycle: DispatcherLifecycleMetrics::build(meter)?,
            temporal: TemporalMetrics::build(meter, || 0)?,
            system: SystemMetrics::build(meter, build_info, start_time)?,
            runtime: RuntimeMetrics::build(meter)?,
        })
    }
}

/// Instance-owned registry of every metric instrument this crate defines.
///
/// Construct with [`Catalog::new`] and call [`Catalog::build`] exactly once with a
/// live meter, or use [`Catalog::disabled`] for a monitoring service that is turned
/// off entirely. All accessors are total regardless of which state the catalog is in.
#[derive(Clone, Debug)]
pub struct Catalog {
    inner: std::sync::Arc<OnceCell<CatalogInner>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// Create an unbuilt catalog. Accessors return no-op facades until [`Self::build`]
    /// is called.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(OnceCell::new()),
        }
    }

    /// Create a catalog that will never be built: every accessor returns a no-op
    /// facade for its lifetime. Used by a disabled [`crate::service::MonitoringService`].
    #[must_use]
    pub fn disabled() -> Self {
        let catalog = Self::new();
        let _ = catalog.inner.set(CatalogInner::noop());
        catalog
    }

    /// Construct every instrument against `meter`, registering the dispatcher-health
    /// and system observable callbacks.
    ///
    /// Idempotent: if this catalog was already built (or is [`Self::disabled`]), this
    /// is a no-op that returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if registering an observable callback fails.
    pub fn build(
        &self,
        meter: &Meter,
        dispatcher_store: DispatcherStore,
        build_info: BuildInfo,
        start_time: Instant,
    ) -> Result<(), CatalogError> {
        if self.inner.get().is_some() {
            return Ok(());
        }
        let built = CatalogInner::build(meter, dispatcher_store, build_info, start_time)?;
        // Lost race: another caller built first. The instruments we just registered
        // leak (callbacks stay registered against `meter`), which is acceptable since
        // `build` is documented as call-once-per-instance.
        let _ = self.inner.set(built);
        Ok(())
    }

    fn get(&self) -> &CatalogInner {
        self.inner.get().unwrap_or(&NOOP_INNER)
    }

    /// Accessor for execution (synchronous HTTP task-execution) instruments.
    #[must_use]
    pub fn execution(&self) -> &ExecutionMetrics {
        &self.get().execution
    }

    /// Accessor for SSE streaming instruments.
    #[must_use]
    pub fn streaming(&self) -> &StreamingMetrics {
        &self.get().streaming
    }

    /// Accessor for LLM token-usage instruments.
    #[must_use]
    pub fn llm_usage(&self) -> &LlmUsageMetrics {
        &self.get().llm_usage
    }

    /// Accessor for LLM provider-client instruments (`spec.md` §4.5 `LLMProviderMetrics()`).
    #[must_use]
    pub fn llm_provider(&self) -> &LlmProviderMetrics {
        &self.get().llm_provider
    }

    /// Accessor for dispatcher lifecycle instruments (worker interceptor helpers).
    #[must_use]
    pub fn dispatcher_lifecycle(&self) -> &DispatcherLifecycleMetrics {
        &self.get().dispatcher_lifecycle
    }

    /// Accessor for workflow-worker execution instruments.
    #[must_use]
    pub fn temporal(&self) -> &TemporalMetrics {
        &self.get().temporal
    }

    /// Accessor for the Tokio runtime occupancy gauges.
    #[must_use]
    pub fn runtime(&self) -> &RuntimeMetrics {
        &self.get().runtime
    }

    /// `true` once [`Self::build`] has taken effect (including [`Self::disabled`]).
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.inner.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_catalog_accessors_never_panic() {
        let catalog = Catalog::disabled();
        catalog.execution().record_started("sync");
        catalog.streaming().record_connect("structured");
        catalog.llm_usage().record_failure("tool", "openai", "gpt", 0.01);
        catalog.llm_provider().record_failure("openai", "gpt", 0.01);
        catalog.dispatcher_lifecycle().record_heartbeat();
        catalog.temporal().record_started("demo");
        let _ = catalog.runtime();
        assert!(catalog.is_built());
    }

    #[test]
    fn unbuilt_catalog_accessors_never_panic() {
        let catalog = Catalog::new();
        catalog.execution().record_started("sync");
        assert!(!catalog.is_built());
    }

    #[test]
    fn build_is_idempotent() {
        let catalog = Catalog::new();
        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().build();
        let meter = provider.meter("test");
        let store = DispatcherStore::new();
        catalog
            .build(&meter, store.clone(), BuildInfo::defaults(), Instant::now())
            .expect("first build succeeds");
        assert!(catalog.is_built());
        // Second call must be a no-op, not a panic or duplicate registration attempt.
        catalog
            .build(&meter, store, BuildInfo::defaults(), Instant::now())
            .expect("repeat build is a no-op");
    }
}
