//! Worker metrics interceptor (`spec.md` §4.7): wraps a workflow execution with
//! started/completed/failed counters and a duration histogram, skips emission during
//! replay, and recovers panics after logging and re-raising them.

use std::{future::Future, panic::AssertUnwindSafe, time::Instant};

use futures::FutureExt;

use crate::catalog::{DispatcherLifecycleMetrics, TemporalMetrics};

/// How a failed workflow execution should be classified (`spec.md` §4.7).
///
/// The interceptor has no built-in notion of the host's error types, so the caller
/// supplies a classifier mapping its own error type to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The workflow was canceled.
    Canceled,
    /// The workflow exceeded its execution deadline.
    Timeout,
    /// Any other failure.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkflowOutcome {
    Completed,
    Canceled,
    Timeout,
    Failed,
}

impl WorkflowOutcome {
    fn label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Timeout => "timeout",
            Self::Failed => "failed",
        }
    }
}

/// Wraps workflow executions with [`TemporalMetrics`] recording.
#[derive(Clone)]
pub struct WorkerInterceptor {
    metrics: TemporalMetrics,
}

impl WorkerInterceptor {
    #[must_use]
    pub(crate) fn new(metrics: TemporalMetrics) -> Self {
        Self { metrics }
    }

    /// Run `f`, recording `started`/`completed`/`failed`/duration around it unless
    /// `is_replay` is set, in which case metric emission is skipped entirely
    /// (`spec.md` §8 invariant 9).
    ///
    /// A panic inside `f` is logged and re-raised after unwinding past this call —
    /// the caller's workflow runtime is expected to observe the same panic it would
    /// have seen without this wrapper.
    pub async fn run<F, Fut, T, E>(&self, workflow_type: &str, is_replay: bool, classify: impl Fn(&E) -> FailureKind, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if is_replay {
            return f().await;
        }

        self.metrics.record_started(workflow_type);
        let start = Instant::now();

        match AssertUnwindSafe(f()).catch_unwind().await {
            Ok(result) => {
                let seconds = start.elapsed().as_secs_f64();
                let outcome = match &result {
                    Ok(_) => WorkflowOutcome::Completed,
                    Err(err) => match classify(err) {
                        FailureKind::Canceled => WorkflowOutcome::Canceled,
                        FailureKind::Timeout => WorkflowOutcome::Timeout,
                        FailureKind::Other => WorkflowOutcome::Failed,
                    },
                };
                self.metrics
                    .record_completion(workflow_type, outcome.label(), seconds);
                result
            }
            Err(panic) => {
                tracing::error!(workflow_type, "workflow execution panicked");
                std::panic::resume_unwind(panic);
            }
        }
    }
}

/// Record a dispatcher starting (`spec.md` §4.7 `StartDispatcher`).
pub fn start_dispatcher(metrics: &DispatcherLifecycleMetrics, id: &str) {
    metrics.start_dispatcher(id);
}

/// Record a dispatcher stopping (`spec.md` §4.7 `StopDispatcher`).
pub fn stop_dispatcher(metrics: &DispatcherLifecycleMetrics, id: &str) {
    metrics.stop_dispatcher(id);
}

/// Record a dispatcher restart (`spec.md` §4.7 `RecordDispatcherRestart`).
pub fn record_dispatcher_restart(metrics: &DispatcherLifecycleMetrics) {
    metrics.restart_dispatcher();
}

/// Record a dispatcher heartbeat (`spec.md` §4.7 `RecordDispatcherHeartbeat`).
pub fn record_dispatcher_heartbeat(metrics: &DispatcherLifecycleMetrics) {
    metrics.record_heartbeat();
}

/// Record a dispatcher takeover attempt (`spec.md` §4.7 `RecordDispatcherTakeover`).
pub fn record_dispatcher_takeover(metrics: &DispatcherLifecycleMetrics, outcome: &str, seconds: f64) {
    metrics.record_takeover(outcome, seconds);
}

/// Record a dispatcher staleness scan (`spec.md` §4.7 `RecordDispatcherScan`).
pub fn record_dispatcher_scan(metrics: &DispatcherLifecycleMetrics, keys_scanned: u64, stale_found: u64, seconds: f64) {
    metrics.record_scan(keys_scanned, stale_found, seconds);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn interceptor() -> WorkerInterceptor {
        WorkerInterceptor::new(Catalog::disabled().temporal().clone())
    }

    #[tokio::test]
    async fn replay_skips_metric_emission_but_still_runs() {
        let interceptor = interceptor();
        let ran = std::cell::Cell::new(false);
        let result: Result<(), &'static str> = interceptor
            .run("demo", true, |_e: &&'static str| FailureKind::Other, || async {
                ran.set(true);
                Ok(())
            })
            .await;
        assert!(result.is_ok());
        assert!(ran.get());
    }

    #[tokio::test]
    async fn completed_execution_classified_correctly() {
        let interceptor = interceptor();
        let result: Result<(), &'static str> = interceptor
            .run("demo", false, |_e: &&'static str| FailureKind::Other, || async { Ok(()) })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn canceled_failure_is_classified_as_canceled() {
        let interceptor = interceptor();
        let result: Result<(), &'static str> = interceptor
            .run("demo", false, |_e: &&'static str| FailureKind::Canceled, || async {
                Err("canceled")
            })
            .await;
        assert_eq!(result, Err("canceled"));
    }

    #[tokio::test]
    #[should_panic(expected = "boom")]
    async fn panic_is_recovered_and_reraised() {
        let interceptor = interceptor();
        let _: Result<(), &'static str> = interceptor
            .run("demo", false, |_e: &&'static str| FailureKind::Other, || async {
                panic!("boom")
            })
            .await;
    }
}
