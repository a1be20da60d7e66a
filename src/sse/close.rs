//! Per-connection close accounting for a task-execution stream.
//!
//! A single [`CloseGuard`] is created per stream and dropped exactly once, at the very
//! end of the connection's lifetime — whether the loop returns normally or the
//! surrounding future is dropped early because the client disconnected. There is no
//! separate "finally" construct in Rust, so the guard's destructor plays that role.

use std::{
    sync::Arc,
    time::Instant,
};

use parking_lot::Mutex;

use crate::catalog::StreamingMetrics;

/// Why a task-execution stream closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Set at stream start and never expected to be observed at close — seeing this
    /// in a disconnect log is a logic bug (a code path returned without assigning a
    /// real reason).
    Initializing,
    /// The execution reached a terminal status and the terminal event was emitted.
    Terminal,
    /// The request context was cancelled (client disconnect, server shutdown).
    ContextCanceled,
    /// A live source (pub/sub subscription, publisher channel) ended cleanly.
    Completed,
    /// A named phase failed. Renders as `"<phase>_error"`.
    PhaseError(&'static str),
}

impl CloseReason {
    /// The string form used both as the `stream_errors_total` `reason` label and in
    /// the disconnect log.
    #[must_use]
    pub fn as_label(&self) -> String {
        match self {
            Self::Initializing => "initializing".to_string(),
            Self::Terminal => "terminal".to_string(),
            Self::ContextCanceled => "context_canceled".to_string(),
            Self::Completed => "completed".to_string(),
            Self::PhaseError(phase) => format!("{phase}_error"),
        }
    }

    /// `true` if this reason represents a failure (and should increment
    /// `stream_errors_total`).
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::PhaseError(_))
    }
}

/// Mutable close state, shared between the stream loop and the [`CloseGuard`] that
/// consumes it once at the end.
#[derive(Debug, Clone)]
pub struct StreamCloseInfo {
    /// Why the stream closed.
    pub reason: CloseReason,
    /// Most recently emitted/observed event id.
    pub last_event_id: i64,
    /// Redacted error detail, present when `reason` is a [`CloseReason::PhaseError`].
    pub error: Option<String>,
}

impl StreamCloseInfo {
    /// Start tracking a stream resumed from `last_event_id`.
    #[must_use]
    pub fn new(last_event_id: i64) -> Self {
        Self {
            reason: CloseReason::Initializing,
            last_event_id,
            error: None,
        }
    }
}

/// Shared handle the stream loop updates as it progresses.
pub type SharedCloseInfo = Arc<Mutex<StreamCloseInfo>>;

/// Deferred finalizer: records stream telemetry and logs a disconnect record exactly
/// once, when dropped.
pub struct CloseGuard {
    metrics: StreamingMetrics,
    kind: &'static str,
    exec_id: String,
    connect_at: Instant,
    close: SharedCloseInfo,
}

impl CloseGuard {
    /// Start the finalizer. Must be constructed after
    /// [`StreamingMetrics::record_connect`] has already been called for this stream.
    #[must_use]
    pub fn new(
        metrics: StreamingMetrics,
        kind: &'static str,
        exec_id: String,
        connect_at: Instant,
        close: SharedCloseInfo,
    ) -> Self {
        Self {
            metrics,
            kind,
            exec_id,
            connect_at,
            close,
        }
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        let close = self.close.lock();
        let duration = self.connect_at.elapsed().as_secs_f64();
        let reason = close.reason.as_label();

        if close.reason.is_error() {
            self.metrics.record_error(self.kind, &reason);
        }
        self.metrics.record_close(self.kind, duration);

        if close.reason == CloseReason::Initializing {
            tracing::warn!(
                exec_id = %self.exec_id,
                kind = self.kind,
                "task execution stream closed while still in its initializing state"
            );
        } else if close.reason.is_error() {
            tracing::warn!(
                exec_id = %self.exec_id,
                kind = self.kind,
                reason = %reason,
                last_event_id = close.last_event_id,
                error = close.error.as_deref().unwrap_or_default(),
                duration_seconds = duration,
                "task execution stream closed with an error"
            );
        } else {
            tracing::info!(
                exec_id = %self.exec_id,
                kind = self.kind,
                reason = %reason,
                last_event_id = close.last_event_id,
                duration_seconds = duration,
                "task execution stream closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn error_reason_renders_as_phase_error() {
        assert_eq!(CloseReason::PhaseError("poll").as_label(), "poll_error");
        assert!(CloseReason::PhaseError("poll").is_error());
        assert!(!CloseReason::Terminal.is_error());
    }

    #[test]
    fn guard_records_telemetry_exactly_once_on_drop() {
        let metrics = Catalog::disabled().streaming().clone();
        let close = Arc::new(Mutex::new(StreamCloseInfo::new(0)));
        close.lock().reason = CloseReason::Terminal;
        close.lock().last_event_id = 3;
        let guard = CloseGuard::new(metrics, "structured", "exec-1".into(), Instant::now(), close);
        drop(guard);
    }
}
