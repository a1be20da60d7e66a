//! Consumed interfaces (`spec.md` §6.4): the narrow trait boundaries the SSE engine
//! needs from the host's task repository, resource store, and pub/sub transport, plus
//! the read-only execution-state data model those traits exchange.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Terminal/non-terminal lifecycle status of a task execution.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Queued, not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Completed successfully.
    Success,
    /// Completed with an error.
    Failed,
    /// Exceeded its execution deadline.
    TimedOut,
    /// Canceled before completion.
    Canceled,
}

impl ExecutionStatus {
    /// `true` for any of `Success`, `Failed`, `TimedOut`, `Canceled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// Token usage reported alongside a completed execution, when available.
#[derive(Clone, Debug, Default, Serialize)]
#[non_exhaustive]
pub struct UsageSummary {
    /// Prompt tokens consumed.
    pub prompt_tokens: u64,
    /// Completion tokens produced.
    pub completion_tokens: u64,
}

/// Read-only snapshot of a task execution's state, as resolved from the host's task
/// repository (`spec.md` §3 `ExecutionState`).
#[derive(Clone, Debug, Serialize)]
#[non_exhaustive]
pub struct ExecutionState {
    /// Execution id (path parameter of the stream endpoint).
    pub exec_id: String,
    /// Parent task id.
    pub task_id: String,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// Output payload, present once `status` is `Success`.
    pub output: Option<Value>,
    /// Error message, present once `status` is `Failed`/`TimedOut`/`Canceled`.
    pub error: Option<String>,
    /// Token usage summary, present on some completions.
    pub usage: Option<UsageSummary>,
    /// Milliseconds since the Unix epoch this snapshot was last updated.
    pub updated_at_ms: u64,
}

/// Sentinel error returned by [`TaskRepository::get_state`] for an unknown execution.
#[derive(Debug, Clone, thiserror::Error)]
#[error("execution not found")]
pub struct NotFoundError;

/// The host's task repository, narrowed to the one read the SSE engine needs.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Fetch the current state of `exec_id`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] if no execution with that id exists; any other error
    /// is surfaced to the engine as a poll failure.
    async fn get_state(&self, exec_id: &str) -> Result<ExecutionState, RepositoryError>;
}

/// Error returned by [`TaskRepository::get_state`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// The execution does not exist.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    /// Any other repository failure (connection, deserialization, etc).
    #[error("{0}")]
    Other(String),
}

/// The host's resource store, narrowed to the one read used to decide stream mode
/// (whether the task config declares an output schema).
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a resource's attribute map by `(project, resource_type, id)`.
    async fn get(
        &self,
        project: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<HashMap<String, Value>, RepositoryError>;
}

/// One message received from a pub/sub subscription.
#[derive(Clone, Debug)]
pub struct PubSubMessage {
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// A live subscription to a pub/sub channel.
///
/// Mirrors the host's subscription contract: a message stream, a done-signal, and an
/// error accessor, modeled here as an async iterator over `Result`.
#[async_trait]
pub trait Subscription: Send {
    /// Await the next message, or `None` once the subscription has ended (cleanly or
    /// with an error already reported by a prior call).
    async fn recv(&mut self) -> Option<Result<PubSubMessage, SubscriptionError>>;

    /// Release any underlying resources. Idempotent.
    async fn close(&mut self);
}

/// Error surfaced by a [`Subscription`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct SubscriptionError(pub String);

/// The host's pub/sub transport, narrowed to channel subscription.
#[async_trait]
pub trait PubSubProvider: Send + Sync {
    /// Subscribe to `channel`, returning a live [`Subscription`].
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, SubscriptionError>;
}

/// One `{id, type, data}` frame from a [`Publisher`]'s bounded history or live channel
/// (`spec.md` §3 `SSEEventEnvelope`).
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Monotonic id assigned by the publisher.
    pub id: i64,
    /// Event type (`task_status`, `llm_chunk`, `complete`, `error`, or caller-defined).
    pub event_type: String,
    /// Event payload.
    pub data: Vec<u8>,
}

/// Optional event-driven publisher, offering replay plus a live channel. When
/// present, the SSE engine uses it instead of the legacy pub/sub channel path
/// (`spec.md` §9.2 / `DESIGN.md`).
#[async_trait]
pub trait Publisher: Send + Sync {
    /// The channel name live envelopes for `exec_id` are delivered on.
    fn channel(&self, exec_id: &str) -> String;

    /// Replay up to `limit` envelopes for `exec_id` with id greater than `since_id`.
    async fn replay(
        &self,
        exec_id: &str,
        since_id: i64,
        limit: usize,
    ) -> Result<Vec<Envelope>, SubscriptionError>;
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::*;

    /// In-memory [`TaskRepository`] whose state can be mutated by the test driving it.
    #[derive(Clone, Default)]
    pub struct FakeTaskRepository {
        states: Arc<Mutex<HashMap<String, ExecutionState>>>,
    }

    impl FakeTaskRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, state: ExecutionState) {
            self.states.lock().insert(state.exec_id.clone(), state);
        }
    }

    #[async_trait]
    impl TaskRepository for FakeTaskRepository {
        async fn get_state(&self, exec_id: &str) -> Result<ExecutionState, RepositoryError> {
            self.states
                .lock()
                .get(exec_id)
                .cloned()
                .ok_or_else(|| RepositoryError::NotFound(NotFoundError))
        }
    }

    /// In-memory [`ResourceStore`] returning a fixed attribute map per `(project, type, id)`.
    #[derive(Clone, Default)]
    pub struct FakeResourceStore {
        entries: Arc<Mutex<HashMap<(String, String, String), HashMap<String, Value>>>>,
    }

    impl FakeResourceStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, project: &str, resource_type: &str, id: &str, attrs: HashMap<String, Value>) {
            self.entries
                .lock()
                .insert((project.to_string(), resource_type.to_string(), id.to_string()), attrs);
        }
    }

    #[async_trait]
    impl ResourceStore for FakeResourceStore {
        async fn get(
            &self,
            project: &str,
            resource_type: &str,
            id: &str,
        ) -> Result<HashMap<String, Value>, RepositoryError> {
            Ok(self
                .entries
                .lock()
                .get(&(project.to_string(), resource_type.to_string(), id.to_string()))
                .cloned()
                .unwrap_or_default())
        }
    }

    /// In-memory [`Subscription`] backed by an mpsc channel the test feeds directly.
    pub struct FakeSubscription {
        pub(crate) rx: mpsc::UnboundedReceiver<Result<PubSubMessage, SubscriptionError>>,
    }

    #[async_trait]
    impl Subscription for FakeSubscription {
        async fn recv(&mut self) -> Option<Result<PubSubMessage, SubscriptionError>> {
            self.rx.recv().await
        }

        async fn close(&mut self) {
            self.rx.close();
        }
    }

    /// In-memory [`PubSubProvider`] that hands out a pre-wired [`FakeSubscription`] per
    /// channel name, fed by the sender the test keeps.
    #[derive(Clone, Default)]
    pub struct FakePubSub {
        channels: Arc<Mutex<HashMap<String, mpsc::UnboundedReceiver<Result<PubSubMessage, SubscriptionError>>>>>,
    }

    impl FakePubSub {
        pub fn new() -> Self {
            Self::default()
        }

        /// Prepare a channel, returning the sender the test uses to publish messages.
        pub fn channel(&self, name: &str) -> mpsc::UnboundedSender<Result<PubSubMessage, SubscriptionError>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.channels.lock().insert(name.to_string(), rx);
            tx
        }
    }

    #[async_trait]
    impl PubSubProvider for FakePubSub {
        async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, SubscriptionError> {
            let rx = self
                .channels
                .lock()
                .remove(channel)
                .ok_or_else(|| SubscriptionError(format!("no fake channel registered: {channel}")))?;
            Ok(Box::new(FakeSubscription { rx }))
        }
    }

    /// In-memory [`Publisher`] with a fixed replay buffer and a live channel reachable
    /// through [`FakePubSub`] under the same channel name.
    #[derive(Clone)]
    pub struct FakePublisher {
        prefix: String,
        history: Arc<Mutex<Vec<Envelope>>>,
    }

    impl FakePublisher {
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                history: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn push_history(&self, envelope: Envelope) {
            self.history.lock().push(envelope);
        }
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        fn channel(&self, exec_id: &str) -> String {
            format!("{}{exec_id}", self.prefix)
        }

        async fn replay(
            &self,
            _exec_id: &str,
            since_id: i64,
            limit: usize,
        ) -> Result<Vec<Envelope>, SubscriptionError> {
            Ok(self
                .history
                .lock()
                .iter()
                .filter(|e| e.id > since_id)
                .take(limit)
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::TimedOut.is_terminal());
        assert!(ExecutionStatus::Canceled.is_terminal());
    }
}
