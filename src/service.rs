//! Composition root (`spec.md` §4.5): owns the exporter, meter provider, and catalog,
//! and exposes the Prometheus HTTP handler and the middleware/interceptor factories
//! the rest of the crate builds on.

use std::{sync::Arc, time::Instant};

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
};
use once_cell::sync::OnceCell;
use opentelemetry::metrics::Meter;
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use opentelemetry_resource_detectors::{OsResourceDetector, ProcessResourceDetector};
use opentelemetry_sdk::{
    metrics::SdkMeterProvider,
    resource::{EnvResourceDetector, SdkProvidedResourceDetector, TelemetryResourceDetector},
    Resource,
};
use opentelemetry_semantic_conventions::resource as res;
use tokio_util::sync::CancellationToken;

use crate::{
    buildinfo::BuildInfo,
    catalog::{
        Catalog, DispatcherLifecycleMetrics, ExecutionMetrics, LlmProviderMetrics, LlmUsageMetrics,
        StreamingMetrics, TemporalMetrics,
    },
    config::MonitoringConfig,
    dispatcher::DispatcherStore,
    errors::MonitoringError,
    interceptor::worker::WorkerInterceptor,
    middleware::http::HttpMetricsLayer,
};

const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);
const DISABLED_BODY: &str = "Monitoring service not initialized";

fn service_resource() -> Resource {
    let static_resources = vec![
        opentelemetry::KeyValue::new(res::SERVICE_NAME, env!("CARGO_PKG_NAME")),
        opentelemetry::KeyValue::new(res::SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
    ];
    Resource::builder()
        .with_detectors(&[
            Box::new(OsResourceDetector),
            Box::new(ProcessResourceDetector),
            Box::new(SdkProvidedResourceDetector),
            Box::new(EnvResourceDetector::new()),
            Box::new(TelemetryResourceDetector),
        ])
        .with_attributes(static_resources)
        .build()
}

struct Inner {
    config: MonitoringConfig,
    catalog: Catalog,
    meter: Meter,
    provider: Option<SdkMeterProvider>,
    exporter: Option<PrometheusExporter>,
    dispatcher_store: DispatcherStore,
    initialization_err: Option<Arc<MonitoringError>>,
    shutdown: OnceCell<()>,
}

/// Composition root for the metric catalog, dispatcher-health store, and Prometheus
/// exposition. Cheap to clone (an `Arc` handle to shared state).
#[derive(Clone)]
pub struct MonitoringService(Arc<Inner>);

impl MonitoringService {
    fn from_inner(inner: Inner) -> Self {
        Self(Arc::new(inner))
    }

    /// A service with a no-op meter and no-op metric facades, matching a disabled
    /// config (`spec.md` §4.5).
    #[must_use]
    pub fn disabled() -> Self {
        Self::from_inner(Inner {
            config: MonitoringConfig::default(),
            catalog: Catalog::disabled(),
            meter: opentelemetry::global::meter("workflow-observability/disabled"),
            provider: None,
            exporter: None,
            dispatcher_store: DispatcherStore::new(),
            initialization_err: None,
            shutdown: OnceCell::new(),
        })
    }

    fn disabled_with_err(err: MonitoringError) -> Self {
        let mut service = Self::disabled();
        Arc::get_mut(&mut service.0).expect("freshly constructed, single owner").initialization_err =
            Some(Arc::new(err));
        service
    }

    /// Validate `cfg` and, if enabled, build a Prometheus exporter, meter provider, and
    /// catalog. Checks `cancel` before starting and again before committing the built
    /// provider; on cancellation the half-built provider is shut down within
    /// [`SHUTDOWN_TIMEOUT`] and [`MonitoringError::Cancelled`] is returned.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `cfg` fails validation, instrument/callback construction
    /// fails, or initialization is cancelled.
    pub async fn new(cfg: &MonitoringConfig, cancel: &CancellationToken) -> Result<Self, MonitoringError> {
        cfg.validate()?;
        if !cfg.enabled {
            return Ok(Self::disabled());
        }
        if cancel.is_cancelled() {
            return Err(MonitoringError::Cancelled);
        }

        let resource = service_resource();
        let exporter = PrometheusExporter::builder().build();
        let provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .with_reader(exporter.clone())
            .build();

        if cancel.is_cancelled() {
            shutdown_provider(&provider).await;
            return Err(MonitoringError::Cancelled);
        }

        let meter = provider.meter("workflow-observability");
        let dispatcher_store = DispatcherStore::new();
        let build_info = BuildInfo::defaults();
        build_info.spawn_loader();
        let catalog = Catalog::new();
        if let Err(err) = catalog.build(&meter, dispatcher_store.clone(), build_info, Instant::now()) {
            shutdown_provider(&provider).await;
            return Err(err.into());
        }

        Ok(Self::from_inner(Inner {
            config: cfg.clone(),
            catalog,
            meter,
            provider: Some(provider),
            exporter: Some(exporter),
            dispatcher_store,
            initialization_err: None,
            shutdown: OnceCell::new(),
        }))
    }

    /// Like [`Self::new`], but on error returns a disabled service carrying the error
    /// in [`Self::initialization_err`] instead of propagating it.
    #[must_use]
    pub async fn new_with_fallback(cfg: &MonitoringConfig, cancel: &CancellationToken) -> Self {
        match Self::new(cfg, cancel).await {
            Ok(service) => service,
            Err(err) => Self::disabled_with_err(err),
        }
    }

    /// The error `new` encountered, if this service was built via
    /// [`Self::new_with_fallback`] and initialization failed.
    #[must_use]
    pub fn initialization_err(&self) -> Option<&Arc<MonitoringError>> {
        self.0.initialization_err.as_ref()
    }

    /// `true` if this service was built from an enabled, successfully-initialized
    /// config.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.0.provider.is_some()
    }

    /// The underlying meter. Never a literal null handle: a disabled service still
    /// returns a usable (no-op) meter.
    #[must_use]
    pub fn meter(&self) -> &Meter {
        &self.0.meter
    }

    /// Execution (synchronous HTTP task-execution) metrics.
    #[must_use]
    pub fn execution_metrics(&self) -> &ExecutionMetrics {
        self.0.catalog.execution()
    }

    /// LLM token-usage metrics.
    #[must_use]
    pub fn llm_usage_metrics(&self) -> &LlmUsageMetrics {
        self.0.catalog.llm_usage()
    }

    /// LLM provider-client metrics (`spec.md` §4.5 `LLMProviderMetrics()`).
    #[must_use]
    pub fn llm_provider_metrics(&self) -> &LlmProviderMetrics {
        self.0.catalog.llm_provider()
    }

    /// SSE streaming metrics.
    #[must_use]
    pub fn streaming_metrics(&self) -> &StreamingMetrics {
        self.0.catalog.streaming()
    }

    /// Workflow-worker (temporal) metrics.
    #[must_use]
    pub fn temporal_metrics(&self) -> &TemporalMetrics {
        self.0.catalog.temporal()
    }

    /// Dispatcher lifecycle metrics, used by the package-level helpers in
    /// [`crate::interceptor::worker`].
    #[must_use]
    pub fn dispatcher_lifecycle_metrics(&self) -> &DispatcherLifecycleMetrics {
        self.0.catalog.dispatcher_lifecycle()
    }

    /// The dispatcher health store backing `dispatcher_health_*` gauges.
    #[must_use]
    pub fn dispatcher_store(&self) -> &DispatcherStore {
        &self.0.dispatcher_store
    }

    /// HTTP metrics middleware layer (`spec.md` §4.6). A no-op pass-through when this
    /// service is disabled, since [`ExecutionMetrics`] is a no-op facade in that case.
    #[must_use]
    pub fn http_layer(&self) -> HttpMetricsLayer {
        HttpMetricsLayer::new(self.0.catalog.execution().clone())
    }

    /// Worker metrics interceptor (`spec.md` §4.7). Base/no-op when this service is
    /// disabled.
    #[must_use]
    pub fn worker_interceptor(&self) -> WorkerInterceptor {
        WorkerInterceptor::new(self.0.catalog.temporal().clone())
    }

    /// Install this service's meter provider as the process-global OpenTelemetry meter
    /// provider. No-op when disabled.
    pub fn set_as_global(&self) {
        if let Some(provider) = &self.0.provider {
            opentelemetry::global::set_meter_provider(provider.clone());
        }
    }

    /// Render the current Prometheus exposition snapshot.
    fn render_metrics(&self) -> Response {
        let Some(exporter) = &self.0.exporter else {
            return (StatusCode::SERVICE_UNAVAILABLE, DISABLED_BODY).into_response();
        };
        let mut buf = Vec::with_capacity(4096);
        match exporter.export(&mut buf) {
            Ok(()) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                buf,
            )
                .into_response(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to render prometheus exposition");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }

    /// An axum `MethodRouter` serving this service's metrics at its configured path
    /// (`spec.md` §6.2). Mount with `Router::new().route(service.metrics_path(),
    /// service.exporter_handler())`.
    #[must_use]
    pub fn exporter_handler(&self) -> MethodRouter {
        let service = self.clone();
        get(move || {
            let service = service.clone();
            async move { service.render_metrics() }
        })
    }

    /// The configured exposition path (`spec.md` §6.1).
    #[must_use]
    pub fn metrics_path(&self) -> &str {
        &self.0.config.path
    }

    /// Shut down the meter provider. Idempotent, and safe to call on a disabled
    /// service.
    pub async fn shutdown(&self) {
        if self.0.shutdown.set(()).is_err() {
            return;
        }
        if let Some(provider) = &self.0.provider {
            shutdown_provider(provider).await;
        }
    }
}

async fn shutdown_provider(provider: &SdkMeterProvider) {
    let provider = provider.clone();
    let result = tokio::time::timeout(
        SHUTDOWN_TIMEOUT,
        tokio::task::spawn_blocking(move || provider.shutdown()),
    )
    .await;
    match result {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => tracing::warn!(error = %err, "error shutting down meter provider"),
        Ok(Err(err)) => tracing::warn!(error = %err, "meter provider shutdown task panicked"),
        Err(_) => tracing::warn!("meter provider shutdown exceeded its bounded timeout"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_config_yields_disabled_service() {
        let cfg = MonitoringConfig::default();
        let cancel = CancellationToken::new();
        let service = MonitoringService::new(&cfg, &cancel).await.unwrap();
        assert!(!service.is_enabled());
        let resp = service.render_metrics();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn enabled_config_serves_200_text_plain() {
        let cfg = MonitoringConfig::default().with_enabled(true);
        let cancel = CancellationToken::new();
        let service = MonitoringService::new(&cfg, &cancel).await.unwrap();
        assert!(service.is_enabled());
        let resp = service.render_metrics();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let cfg = MonitoringConfig::default().with_enabled(true).with_path("metrics");
        let cancel = CancellationToken::new();
        let err = MonitoringService::new(&cfg, &cancel).await.unwrap_err();
        assert!(matches!(err, MonitoringError::Config(_)));
    }

    #[tokio::test]
    async fn new_with_fallback_degrades_to_disabled_on_error() {
        let cfg = MonitoringConfig::default().with_enabled(true).with_path("metrics");
        let cancel = CancellationToken::new();
        let service = MonitoringService::new_with_fallback(&cfg, &cancel).await;
        assert!(!service.is_enabled());
        assert!(service.initialization_err().is_some());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let cfg = MonitoringConfig::default().with_enabled(true);
        let cancel = CancellationToken::new();
        let service = MonitoringService::new(&cfg, &cancel).await.unwrap();
        service.shutdown().await;
        service.shutdown().await;
    }
}
