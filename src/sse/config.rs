//! Per-connection stream configuration: resolving request inputs and the host's
//! collaborators into a ready-to-run [`StreamConfig`].

use std::{collections::HashSet, sync::Arc, time::Duration};

use crate::{
    config::StreamTuningConfig,
    errors::StreamError,
    repository::{ExecutionState, PubSubProvider, Publisher, ResourceStore, TaskRepository},
};

/// Key read from a task resource's attribute map to decide stream mode
/// (`spec.md` §4.8 `PREPARE`: "mode from whether the task config has a declared output
/// schema").
const OUTPUT_SCHEMA_KEY: &str = "output_schema";

/// Resource type name the SSE engine looks up in the host's resource store to decide
/// stream mode.
const TASK_RESOURCE_TYPE: &str = "task";

/// Known SSE event type tokens, accepted by the `events` query-filter (`spec.md` §6.3).
pub const KNOWN_EVENT_TYPES: [&str; 4] = ["task_status", "llm_chunk", "complete", "error"];

/// Which loop the engine runs once a [`Publisher`] is not present (`spec.md` §4.8).
/// When a publisher *is* present, the event-driven loop runs instead regardless of
/// this value (`spec.md` §9.2 / `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Poll-only: JSON `task_status`/`complete`/`error` events.
    Structured,
    /// Poll plus a legacy pub/sub channel forwarding opaque `llm_chunk` bytes.
    Text,
}

impl StreamMode {
    /// Metric label / disconnect-log value for this mode (`spec.md` §4.8: "kind").
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Text => "text",
        }
    }
}

/// Per-connection stream configuration, resolved once at `PREPARE` and consumed by
/// [`crate::sse::engine::run`] (`spec.md` §3).
pub struct StreamConfig {
    /// Execution id being streamed.
    pub exec_id: String,
    /// Task repository, polled for state transitions.
    pub repo: Arc<dyn TaskRepository>,
    /// Pub/sub provider, required in [`StreamMode::Text`] or whenever `publisher` is
    /// set.
    pub pubsub: Option<Arc<dyn PubSubProvider>>,
    /// Optional event-driven publisher. When present, bypasses the mode split
    /// entirely (`spec.md` §4.8 "Event-driven alternative loop").
    pub publisher: Option<Arc<dyn Publisher>>,
    /// Execution state snapshot read during `PREPARE`.
    pub initial_state: ExecutionState,
    /// Resolved polling interval.
    pub poll_interval: Duration,
    /// `Last-Event-ID` the client resumed from (0 if absent).
    pub last_event_id: i64,
    /// Structured vs. text.
    pub mode: StreamMode,
    /// Heartbeat (keep-alive comment) interval.
    pub heartbeat_interval: Duration,
    /// Client-side event-type filter; `None` means "no filter, emit everything".
    pub event_filter: Option<HashSet<String>>,
    /// Pub/sub channel prefix for the legacy text-mode channel path.
    pub channel_prefix: String,
}

/// Raw, unvalidated request inputs consumed by [`prepare`] (`spec.md` §6.3).
pub struct StreamRequest<'a> {
    /// Execution id path parameter.
    pub exec_id: String,
    /// Project the execution's task belongs to, used to resolve the task resource.
    pub project: &'a str,
    /// `poll_ms` query parameter, if present.
    pub poll_ms: Option<u64>,
    /// `events` query parameter (comma-separated), if present.
    pub events: Option<&'a str>,
    /// `Last-Event-ID` request header, if present.
    pub last_event_id: Option<&'a str>,
}

/// Resolve a [`StreamConfig`] from the raw request inputs and the host's collaborators
/// (`spec.md` §4.8 `PREPARE`).
///
/// # Errors
///
/// - [`StreamError::NotFound`] if `request.exec_id` is unknown to `repo`.
/// - [`StreamError::InvalidPollMs`] / [`StreamError::InvalidLastEventId`] /
///   [`StreamError::InvalidEventFilter`] for malformed query/header input.
/// - [`StreamError::PubSubUnavailable`] if text mode (or a publisher) needs a pub/sub
///   provider that was not supplied.
#[allow(clippy::too_many_arguments)]
pub async fn prepare(
    request: StreamRequest<'_>,
    repo: Arc<dyn TaskRepository>,
    resources: Arc<dyn ResourceStore>,
    pubsub: Option<Arc<dyn PubSubProvider>>,
    publisher: Option<Arc<dyn Publisher>>,
    tuning: &StreamTuningConfig,
) -> Result<StreamConfig, StreamError> {
    let initial_state = repo
        .get_state(&request.exec_id)
        .await
        .map_err(|err| match err {
            crate::repository::RepositoryError::NotFound(_) => StreamError::NotFound,
            other => StreamError::Poll(other.to_string()),
        })?;

    let resource = resources
        .get(request.project, TASK_RESOURCE_TYPE, &initial_state.task_id)
        .await
        .map_err(|err| StreamError::Poll(err.to_string()))?;
    let has_output_schema = resource
        .get(OUTPUT_SCHEMA_KEY)
        .is_some_and(|v| !v.is_null());
    let mode = if has_output_schema {
        StreamMode::Structured
    } else {
        StreamMode::Text
    };

    if publisher.is_some() || mode == StreamMode::Text {
        if pubsub.is_none() {
            return Err(StreamError::PubSubUnavailable);
        }
    }

    let poll_ms = request
        .poll_ms
        .map(Duration::from_millis);
    let poll_interval = tuning
        .resolve_poll_interval(poll_ms)
        .ok_or_else(|| StreamError::InvalidPollMs(format!("{:?}", request.poll_ms)))?;

    let last_event_id = match request.last_event_id {
        None => 0,
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|id| *id >= 0)
            .ok_or_else(|| StreamError::InvalidLastEventId(raw.to_string()))?,
    };

    let event_filter = match request.events {
        None => None,
        Some(raw) => {
            let mut set = HashSet::new();
            for token in raw.split(',') {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                if !KNOWN_EVENT_TYPES.contains(&token) {
                    return Err(StreamError::InvalidEventFilter(token.to_string()));
                }
                set.insert(token.to_string());
            }
            Some(set)
        }
    };

    Ok(StreamConfig {
        exec_id: request.exec_id,
        repo,
        pubsub,
        publisher,
        initial_state,
        poll_interval,
        last_event_id,
        mode,
        heartbeat_interval: tuning.heartbeat_frequency,
        event_filter,
        channel_prefix: tuning.redis_channel_prefix.clone(),
    })
}

/// `true` if `event_type` passes `filter` (an absent filter passes everything).
#[must_use]
pub(crate) fn event_allowed(filter: &Option<HashSet<String>>, event_type: &str) -> bool {
    filter.as_ref().is_none_or(|set| set.contains(event_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fakes::{FakePubSub, FakeResourceStore, FakeTaskRepository};
    use crate::repository::ExecutionStatus;
    use std::collections::HashMap;

    fn tuning() -> StreamTuningConfig {
        StreamTuningConfig::default()
    }

    fn running_state(exec_id: &str, task_id: &str) -> ExecutionState {
        ExecutionState {
            exec_id: exec_id.to_string(),
            task_id: task_id.to_string(),
            status: ExecutionStatus::Running,
            output: None,
            error: None,
            usage: None,
            updated_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn structured_mode_selected_when_output_schema_present() {
        let repo = Arc::new(FakeTaskRepository::new());
        repo.set(running_state("e1", "t1"));
        let resources = Arc::new(FakeResourceStore::new());
        resources.set(
            "proj",
            "task",
            "t1",
            HashMap::from([("output_schema".to_string(), serde_json::json!({"type": "object"}))]),
        );

        let cfg = prepare(
            StreamRequest {
                exec_id: "e1".into(),
                project: "proj",
                poll_ms: None,
                events: None,
                last_event_id: None,
            },
            repo,
            resources,
            None,
            None,
            &tuning(),
        )
        .await
        .unwrap();
        assert_eq!(cfg.mode, StreamMode::Structured);
    }

    #[tokio::test]
    async fn text_mode_without_pubsub_is_rejected() {
        let repo = Arc::new(FakeTaskRepository::new());
        repo.set(running_state("e1", "t1"));
        let resources = Arc::new(FakeResourceStore::new());

        let err = prepare(
            StreamRequest {
                exec_id: "e1".into(),
                project: "proj",
                poll_ms: None,
                events: None,
                last_event_id: None,
            },
            repo,
            resources,
            None,
            None,
            &tuning(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StreamError::PubSubUnavailable));
    }

    #[tokio::test]
    async fn text_mode_with_pubsub_is_accepted() {
        let repo = Arc::new(FakeTaskRepository::new());
        repo.set(running_state("e1", "t1"));
        let resources = Arc::new(FakeResourceStore::new());
        let pubsub = Arc::new(FakePubSub::new());

        let cfg = prepare(
            StreamRequest {
                exec_id: "e1".into(),
                project: "proj",
                poll_ms: None,
                events: None,
                last_event_id: None,
            },
            repo,
            resources,
            Some(pubsub),
            None,
            &tuning(),
        )
        .await
        .unwrap();
        assert_eq!(cfg.mode, StreamMode::Text);
    }

    #[tokio::test]
    async fn unknown_execution_is_not_found() {
        let repo = Arc::new(FakeTaskRepository::new());
        let resources = Arc::new(FakeResourceStore::new());
        let err = prepare(
            StreamRequest {
                exec_id: "missing".into(),
                project: "proj",
                poll_ms: None,
                events: None,
                last_event_id: None,
            },
            repo,
            resources,
            None,
            None,
            &tuning(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StreamError::NotFound));
    }

    #[tokio::test]
    async fn poll_ms_out_of_bounds_is_rejected() {
        let repo = Arc::new(FakeTaskRepository::new());
        repo.set(running_state("e1", "t1"));
        let resources = Arc::new(FakeResourceStore::new());
        resources.set(
            "proj",
            "task",
            "t1",
            HashMap::from([("output_schema".to_string(), serde_json::json!({"type": "object"}))]),
        );
        let err = prepare(
            StreamRequest {
                exec_id: "e1".into(),
                project: "proj",
                poll_ms: Some(50),
                events: None,
                last_event_id: None,
            },
            repo,
            resources,
            None,
            None,
            &tuning(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StreamError::InvalidPollMs(_)));
    }

    #[tokio::test]
    async fn invalid_last_event_id_is_rejected() {
        let repo = Arc::new(FakeTaskRepository::new());
        repo.set(running_state("e1", "t1"));
        let resources = Arc::new(FakeResourceStore::new());
        resources.set(
            "proj",
            "task",
            "t1",
            HashMap::from([("output_schema".to_string(), serde_json::json!({"type": "object"}))]),
        );
        let err = prepare(
            StreamRequest {
                exec_id: "e1".into(),
                project: "proj",
                poll_ms: None,
                events: None,
                last_event_id: Some("not-a-number"),
            },
            repo,
            resources,
            None,
            None,
            &tuning(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StreamError::InvalidLastEventId(_)));
    }

    #[tokio::test]
    async fn unknown_event_filter_token_is_rejected() {
        let repo = Arc::new(FakeTaskRepository::new());
        repo.set(running_state("e1", "t1"));
        let resources = Arc::new(FakeResourceStore::new());
        resources.set(
            "proj",
            "task",
            "t1",
            HashMap::from([("output_schema".to_string(), serde_json::json!({"type": "object"}))]),
        );
        let err = prepare(
            StreamRequest {
                exec_id: "e1".into(),
                project: "proj",
                poll_ms: None,
                events: Some("task_status,bogus"),
                last_event_id: None,
            },
            repo,
            resources,
            None,
            None,
            &tuning(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StreamError::InvalidEventFilter(_)));
    }
}
