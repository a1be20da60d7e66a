//! Per-request HTTP metrics middleware (`spec.md` §4.6), modeled on a `tower`
//! `Layer`/`Service` pair plus a response future holding a finalizer guard — the same
//! shape as the SSE engine's [`crate::sse::close::CloseGuard`], here guaranteeing a
//! request is recorded exactly once even if the downstream service's future is
//! dropped mid-poll (for instance because a panic unwound through it).

use std::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
    time::Instant,
};

use axum::{body::Body, extract::Request, http::StatusCode, response::Response};
use pin_project::pin_project;
use tower::{Layer, Service};

use crate::catalog::ExecutionMetrics;

/// Builds [`HttpMetricsService`] around an inner `tower` service.
///
/// Apply with `Router::route_layer` (not `Router::layer`) so the `MatchedPath`
/// extension — used to derive the `kind` label — is already present on the request
/// by the time this layer's service runs.
#[derive(Clone)]
pub struct HttpMetricsLayer {
    metrics: ExecutionMetrics,
}

impl HttpMetricsLayer {
    /// Build a layer recording through `metrics`.
    #[must_use]
    pub fn new(metrics: ExecutionMetrics) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for HttpMetricsLayer {
    type Service = HttpMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpMetricsService {
            metrics: self.metrics.clone(),
            inner,
        }
    }
}

/// `tower::Service` recording [`ExecutionMetrics`] around an inner service.
#[derive(Clone)]
pub struct HttpMetricsService<S> {
    metrics: ExecutionMetrics,
    inner: S,
}

impl<S> Service<Request<Body>> for HttpMetricsService<S>
where
    S: Service<Request<Body>, Response = Response>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = HttpMetricsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let kind = req
            .extensions()
            .get::<axum::extract::MatchedPath>()
            .map(|path| path.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.metrics.record_started(&kind);
        HttpMetricsFuture {
            inner: self.inner.call(req),
            guard: FinishGuard {
                metrics: self.metrics.clone(),
                kind,
                start: Instant::now(),
                finished: false,
            },
        }
    }
}

/// Classify a response status into `(outcome, code)` (`spec.md` §4.6: "outcome is
/// derived from response status class, timeout detection, and error presence").
fn classify(status: StatusCode) -> (&'static str, Option<String>) {
    if status == StatusCode::REQUEST_TIMEOUT {
        ("timeout", None)
    } else if status.is_server_error() {
        ("error", Some(status.as_str().to_string()))
    } else if status.is_client_error() {
        ("client_error", Some(status.as_str().to_string()))
    } else {
        ("success", None)
    }
}

struct FinishGuard {
    metrics: ExecutionMetrics,
    kind: String,
    start: Instant,
    finished: bool,
}

impl FinishGuard {
    fn finish(&mut self, outcome: &str, code: Option<&str>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.metrics
            .record_latency(&self.kind, outcome, self.start.elapsed().as_secs_f64());
        if outcome == "timeout" {
            self.metrics.record_timeout(&self.kind);
        }
        if let Some(code) = code {
            self.metrics.record_error(&self.kind, code);
        }
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        // Only reached without an explicit `finish` call if the future was dropped
        // before completing — a cancelled request or a panic unwinding through it.
        self.finish("canceled", None);
    }
}

/// Response future for [`HttpMetricsService`].
#[pin_project]
pub struct HttpMetricsFuture<F> {
    #[pin]
    inner: F,
    guard: FinishGuard,
}

impl<F, E> Future for HttpMetricsFuture<F>
where
    F: Future<Output = Result<Response, E>>,
{
    type Output = Result<Response, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        match &result {
            Ok(resp) => {
                let (outcome, code) = classify(resp.status());
                this.guard.finish(outcome, code.as_deref());
            }
            Err(_) => this.guard.finish("error", Some("inner_error")),
        }
        Poll::Ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use axum::body::Body;
    use std::convert::Infallible;
    use tower::service_fn;

    #[tokio::test]
    async fn records_success_once() {
        let metrics = Catalog::disabled().execution().clone();
        let layer = HttpMetricsLayer::new(metrics);
        let mut svc = layer.layer(service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(Response::new(Body::empty()))
        }));
        let req = Request::builder().uri("/x").body(Body::empty()).unwrap();
        let resp = Service::call(&mut svc, req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn guard_does_not_double_count_when_future_is_dropped() {
        let metrics = Catalog::disabled().execution().clone();
        let layer = HttpMetricsLayer::new(metrics);
        let mut svc = layer.layer(service_fn(|_req: Request<Body>| async {
            std::future::pending::<Result<Response, Infallible>>().await
        }));
        let req = Request::builder().uri("/y").body(Body::empty()).unwrap();
        let fut = Service::call(&mut svc, req);
        drop(fut);
    }
}
