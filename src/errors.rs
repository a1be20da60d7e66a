//! Error types for the observability core.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Tag URI used on problem-details bodies returned for catalog errors.
pub(crate) const TAG_CATALOG: &str = "tag:workflow-observability,2026:catalog";
/// Tag URI used on problem-details bodies for monitoring service errors.
pub(crate) const TAG_MONITORING: &str = "tag:workflow-observability,2026:monitoring";
/// Tag URI used on problem-details bodies for stream errors.
pub(crate) const TAG_STREAM: &str = "tag:workflow-observability,2026:stream";

/// Errors raised while constructing the metric catalog ([`crate::catalog`]).
///
/// `opentelemetry`'s instrument builders (`Meter::u64_counter(..).build()` and
/// friends) are infallible: malformed configuration is reported to the global error
/// handler, not returned. The only genuinely fallible step in catalog construction is
/// registering an observable callback, so that is the only variant here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    /// Failed to register an observable-gauge callback for the named group.
    #[error("failed to register {callback} observable callback: {source}")]
    CallbackRegistration {
        /// Name of the observable-gauge group the callback covers.
        callback: &'static str,
        /// Underlying OpenTelemetry error.
        #[source]
        source: opentelemetry::metrics::MetricError,
    },
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
            .with_type(TAG_CATALOG)
            .with_title(self.to_string())
            .into_response()
    }
}

/// Errors raised while validating [`crate::config::MonitoringConfig`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configured path was empty.
    #[error("monitoring path must not be empty")]
    EmptyPath,
    /// The configured path did not start with `/`.
    #[error("monitoring path must be an absolute path starting with '/': {0}")]
    NotAbsolute(String),
    /// The configured path lies under `/api/`.
    #[error("monitoring path must not live under /api/: {0}")]
    UnderApi(String),
    /// The configured path contains a `?`.
    #[error("monitoring path must not contain '?': {0}")]
    ContainsQuery(String),
}

/// Errors raised while composing or running [`crate::service::MonitoringService`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MonitoringError {
    /// Configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The metric catalog failed to build.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Failed to build the Prometheus/OTel exporter or meter provider.
    #[error("failed to build metrics exporter: {0}")]
    ExporterInit(opentelemetry::metrics::MetricError),
    /// Initialization was cancelled via the caller's context.
    #[error("monitoring service initialization was cancelled")]
    Cancelled,
    /// Shutting down the meter provider exceeded the bounded timeout.
    #[error("monitoring service shutdown timed out")]
    ShutdownTimeout,
}

impl IntoResponse for MonitoringError {
    fn into_response(self) -> Response {
        problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
            .with_type(TAG_MONITORING)
            .with_title(self.to_string())
            .into_response()
    }
}

/// Errors surfaced while preparing or running a task-execution SSE stream.
///
/// Each variant maps directly to an HTTP status code, and for the ones that occur
/// mid-stream, to a `close_reason` of `<phase>_error`.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum StreamError {
    /// The requested execution does not exist in the task repository.
    #[error("execution not found")]
    NotFound,
    /// Text mode was selected but no pub/sub provider could be resolved.
    #[error("pub/sub provider unavailable for text-mode stream")]
    PubSubUnavailable,
    /// The `poll_ms` query parameter was missing/invalid or out of bounds.
    #[error("invalid poll_ms parameter: {0}")]
    InvalidPollMs(String),
    /// The `Last-Event-ID` header was present but not a valid non-negative integer.
    #[error("invalid Last-Event-ID header: {0}")]
    InvalidLastEventId(String),
    /// The `events` query parameter named an unknown event type.
    #[error("unknown event type in events filter: {0}")]
    InvalidEventFilter(String),
    /// The task repository returned an error while polling.
    #[error("error reading execution state: {0}")]
    Poll(String),
    /// The pub/sub subscription failed or ended with an error.
    #[error("pub/sub subscription error: {0}")]
    Subscribe(String),
    /// Writing an SSE frame to the response failed (e.g. a disconnected client).
    #[error("failed writing SSE frame: {0}")]
    Write(String),
}

impl StreamError {
    /// Map this error to its HTTP status code.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PubSubUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidPollMs(_) | Self::InvalidLastEventId(_) | Self::InvalidEventFilter(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Poll(_) | Self::Subscribe(_) | Self::Write(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Close-reason phase token used in [`crate::sse::close::StreamCloseInfo`].
    #[must_use]
    pub fn phase(&self) -> &'static str {
        match self {
            Self::NotFound
            | Self::InvalidPollMs(_)
            | Self::InvalidLastEventId(_)
            | Self::InvalidEventFilter(_) => "status",
            Self::PubSubUnavailable | Self::Subscribe(_) => "subscribe",
            Self::Poll(_) => "poll",
            Self::Write(_) => "event",
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        problemdetails::new(status)
            .with_type(TAG_STREAM)
            .with_title(self.to_string())
            .into_response()
    }
}
