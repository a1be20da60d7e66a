//! The SSE engine: turns a prepared [`StreamConfig`] into the response stream served
//! to the client.
//!
//! Three loop shapes share one shell (connect accounting, the [`CloseGuard`]
//! finalizer, heartbeats, cancellation): structured (poll-only), text (poll plus a
//! legacy pub/sub channel carrying opaque chunks), and event-driven (replay plus a
//! publisher's live channel of already-typed envelopes). Each is written out in full
//! rather than factored through a helper, because `async-stream`'s `stream!` macro
//! scans for `yield` as a raw token before any inner macro expansion runs — moving the
//! `yield`-bearing loop body into a called function or a `macro_rules!` would silently
//! stop compiling as a generator.

use std::{convert::Infallible, time::Instant};

use async_stream::stream;
use axum::response::sse::{Event, Sse};
use futures::Stream;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::StreamingMetrics,
    repository::{Envelope, ExecutionState, ExecutionStatus},
    sse::{
        close::{CloseGuard, CloseReason, StreamCloseInfo},
        config::{event_allowed, StreamConfig, StreamMode},
        envelope::decode_envelope,
    },
};

fn effective_kind(config: &StreamConfig) -> &'static str {
    if config.publisher.is_some() {
        "event_driven"
    } else {
        config.mode.label()
    }
}

fn status_event(id: i64, state: &ExecutionState) -> Event {
    let body = serde_json::json!({
        "status": state.status,
        "updated_at_ms": state.updated_at_ms,
    });
    Event::default()
        .id(id.to_string())
        .event("task_status")
        .json_data(body)
        .unwrap_or_else(|_| Event::default().id(id.to_string()).event("task_status"))
}

/// `(event_type, body)` for a state that has already reached a terminal status.
fn terminal_payload(state: &ExecutionState) -> (&'static str, serde_json::Value) {
    if state.status == ExecutionStatus::Success {
        (
            "complete",
            serde_json::json!({
                "status": state.status,
                "result": state.output,
                "usage": state.usage,
                "ts": state.updated_at_ms,
            }),
        )
    } else {
        (
            "error",
            serde_json::json!({
                "status": state.status,
                "error": state.error,
                "ts": state.updated_at_ms,
            }),
        )
    }
}

fn terminal_event(id: i64, state: &ExecutionState) -> Event {
    let (event_type, body) = terminal_payload(state);
    Event::default()
        .id(id.to_string())
        .event(event_type)
        .json_data(body)
        .unwrap_or_else(|_| Event::default().id(id.to_string()).event(event_type))
}

fn heartbeat_event() -> Event {
    Event::default().comment("")
}

fn envelope_event(envelope: &Envelope) -> Event {
    let data = String::from_utf8_lossy(&envelope.data).into_owned();
    Event::default()
        .id(envelope.id.to_string())
        .event(envelope.event_type.clone())
        .data(data)
}

/// Build the response stream for a prepared connection.
///
/// Records the connect metric synchronously (before the first poll of the returned
/// stream) so a client that drops the connection before ever polling it still counts
/// as a connection that opened and closed.
#[must_use]
pub fn run(
    config: StreamConfig,
    metrics: StreamingMetrics,
    cancel: CancellationToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let kind = effective_kind(&config);
    metrics.record_connect(kind);
    let connect_at = Instant::now();
    let close: Arc<Mutex<StreamCloseInfo>> =
        Arc::new(Mutex::new(StreamCloseInfo::new(config.last_event_id)));

    let body = stream! {
        let _guard = CloseGuard::new(metrics.clone(), kind, config.exec_id.clone(), connect_at, close.clone());
        let mut local_id = config.last_event_id;
        let mut first_event_recorded = false;
        macro_rules! mark_first_event {
            () => {
                if !first_event_recorded {
                    first_event_recorded = true;
                    metrics.record_time_to_first_event(kind, connect_at.elapsed().as_secs_f64());
                }
            };
        }

        if event_allowed(&config.event_filter, "task_status") {
            local_id += 1;
            mark_first_event!();
            metrics.record_event(kind, "task_status");
            yield Ok(status_event(local_id, &config.initial_state));
        }
        let mut last_seen = (config.initial_state.status, config.initial_state.updated_at_ms);
        if config.initial_state.status.is_terminal() {
            let (event_type, _) = terminal_payload(&config.initial_state);
            if event_allowed(&config.event_filter, event_type) {
                local_id += 1;
                metrics.record_event(kind, event_type);
                yield Ok(terminal_event(local_id, &config.initial_state));
            }
            close.lock().reason = CloseReason::Terminal;
            close.lock().last_event_id = local_id;
            return;
        }

        match (&config.publisher, config.mode) {
            (Some(publisher), _) => {
                let mut replayed = publisher
                    .replay(&config.exec_id, config.last_event_id, 500)
                    .await
                    .unwrap_or_default();
                replayed.sort_by_key(|e| e.id);
                for envelope in replayed {
                    if envelope.id <= local_id {
                        continue;
                    }
                    local_id = envelope.id;
                    if event_allowed(&config.event_filter, &envelope.event_type) {
                        mark_first_event!();
                        metrics.record_event(kind, &envelope.event_type);
                        yield Ok(envelope_event(&envelope));
                    }
                }

                let channel = publisher.channel(&config.exec_id);
                let subscription = match &config.pubsub {
                    Some(pubsub) => pubsub.subscribe(&channel).await,
                    None => Err(crate::repository::SubscriptionError(
                        "pub/sub provider unavailable".to_string(),
                    )),
                };
                let mut subscription = match subscription {
                    Ok(sub) => sub,
                    Err(err) => {
                        close.lock().reason = CloseReason::PhaseError("subscribe");
                        close.lock().error = Some(err.to_string());
                        return;
                    }
                };

                let mut poll_timer = tokio::time::interval(config.poll_interval);
                let mut heartbeat_timer = tokio::time::interval(config.heartbeat_interval);
                poll_timer.tick().await;
                heartbeat_timer.tick().await;

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            close.lock().reason = CloseReason::ContextCanceled;
                            close.lock().last_event_id = local_id;
                            return;
                        }
                        _ = heartbeat_timer.tick() => {
                            yield Ok(heartbeat_event());
                        }
                        _ = poll_timer.tick() => {
                            let state = match config.repo.get_state(&config.exec_id).await {
                                Ok(s) => s,
                                Err(err) => {
                                    close.lock().reason = CloseReason::PhaseError("poll");
                                    close.lock().error = Some(err.to_string());
                                    close.lock().last_event_id = local_id;
                                    return;
                                }
                            };
                            if state.status.is_terminal() {
                                let (event_type, _) = terminal_payload(&state);
                                if event_allowed(&config.event_filter, event_type) {
                                    local_id += 1;
                                    metrics.record_event(kind, event_type);
                                    yield Ok(terminal_event(local_id, &state));
                                }
                                close.lock().reason = CloseReason::Terminal;
                                close.lock().last_event_id = local_id;
                                return;
                            }
                        }
                        message = subscription.recv() => {
                            match message {
                                Some(Ok(msg)) => {
                                    match decode_envelope(&msg.payload) {
                                        Ok(envelope) => {
                                            if envelope.id <= local_id {
                                                continue;
                                            }
                                            local_id = envelope.id;
                                            if event_allowed(&config.event_filter, &envelope.event_type) {
                                                mark_first_event!();
                                                metrics.record_event(kind, &envelope.event_type);
                                                yield Ok(envelope_event(&envelope));
                                            }
                                        }
                                        Err(detail) => {
                                            close.lock().reason = CloseReason::PhaseError("decode");
                                            close.lock().error = Some(detail);
                                            close.lock().last_event_id = local_id;
                                            return;
                                        }
                                    }
                                }
                                Some(Err(err)) => {
                                    close.lock().reason = CloseReason::PhaseError("pubsub");
                                    close.lock().error = Some(err.to_string());
                                    close.lock().last_event_id = local_id;
                                    return;
                                }
                                None => {
                                    close.lock().reason = CloseReason::Completed;
                                    close.lock().last_event_id = local_id;
                                    return;
                                }
                            }
                        }
                    }
                }
            }
            (None, StreamMode::Structured) => {
                let mut poll_timer = tokio::time::interval(config.poll_interval);
                let mut heartbeat_timer = tokio::time::interval(config.heartbeat_interval);
                poll_timer.tick().await;
                heartbeat_timer.tick().await;

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            close.lock().reason = CloseReason::ContextCanceled;
                            close.lock().last_event_id = local_id;
                            return;
                        }
                        _ = heartbeat_timer.tick() => {
                            yield Ok(heartbeat_event());
                        }
                        _ = poll_timer.tick() => {
                            let state = match config.repo.get_state(&config.exec_id).await {
                                Ok(s) => s,
                                Err(err) => {
                                    close.lock().reason = CloseReason::PhaseError("poll");
                                    close.lock().error = Some(err.to_string());
                                    close.lock().last_event_id = local_id;
                                    return;
                                }
                            };
                            let status_key = (state.status, state.updated_at_ms);
                            if status_key != last_seen {
                                last_seen = status_key;
                                if event_allowed(&config.event_filter, "task_status") {
                                    local_id += 1;
                                    mark_first_event!();
                                    metrics.record_event(kind, "task_status");
                                    yield Ok(status_event(local_id, &state));
                                }
                            }
                            if state.status.is_terminal() {
                                let (event_type, _) = terminal_payload(&state);
                                if event_allowed(&config.event_filter, event_type) {
                                    local_id += 1;
                                    metrics.record_event(kind, event_type);
                                    yield Ok(terminal_event(local_id, &state));
                                }
                                close.lock().reason = CloseReason::Terminal;
                                close.lock().last_event_id = local_id;
                                return;
                            }
                        }
                    }
                }
            }
            (None, StreamMode::Text) => {
                let channel = format!("{}{}", config.channel_prefix, config.exec_id);
                let subscription = match &config.pubsub {
                    Some(pubsub) => pubsub.subscribe(&channel).await,
                    None => Err(crate::repository::SubscriptionError(
                        "pub/sub provider unavailable".to_string(),
                    )),
                };
                let mut subscription = match subscription {
                    Ok(sub) => sub,
                    Err(err) => {
                        close.lock().reason = CloseReason::PhaseError("subscribe");
                        close.lock().error = Some(err.to_string());
                        return;
                    }
                };

                let mut poll_timer = tokio::time::interval(config.poll_interval);
                let mut heartbeat_timer = tokio::time::interval(config.heartbeat_interval);
                poll_timer.tick().await;
                heartbeat_timer.tick().await;

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            close.lock().reason = CloseReason::ContextCanceled;
                            close.lock().last_event_id = local_id;
                            return;
                        }
                        _ = heartbeat_timer.tick() => {
                            yield Ok(heartbeat_event());
                        }
                        _ = poll_timer.tick() => {
                            let state = match config.repo.get_state(&config.exec_id).await {
                                Ok(s) => s,
                                Err(err) => {
                                    close.lock().reason = CloseReason::PhaseError("poll");
                                    close.lock().error = Some(err.to_string());
                                    close.lock().last_event_id = local_id;
                                    return;
                                }
                            };
                            let status_key = (state.status, state.updated_at_ms);
                            if status_key != last_seen {
                                last_seen = status_key;
                                if event_allowed(&config.event_filter, "task_status") {
                                    local_id += 1;
                                    mark_first_event!();
                                    metrics.record_event(kind, "task_status");
                                    yield Ok(status_event(local_id, &state));
                                }
                            }
                            if state.status.is_terminal() {
                                let (event_type, _) = terminal_payload(&state);
                                if event_allowed(&config.event_filter, event_type) {
                                    local_id += 1;
                                    metrics.record_event(kind, event_type);
                                    yield Ok(terminal_event(local_id, &state));
                                }
                                close.lock().reason = CloseReason::Terminal;
                                close.lock().last_event_id = local_id;
                                return;
                            }
                        }
                        message = subscription.recv() => {
                            match message {
                                Some(Ok(msg)) => {
                                    if event_allowed(&config.event_filter, "llm_chunk") {
                                        local_id += 1;
                                        mark_first_event!();
                                        metrics.record_event(kind, "llm_chunk");
                                        let data = String::from_utf8_lossy(&msg.payload).into_owned();
                                        yield Ok(Event::default().id(local_id.to_string()).event("llm_chunk").data(data));
                                    }
                                }
                                Some(Err(err)) => {
                                    close.lock().reason = CloseReason::PhaseError("chunk");
                                    close.lock().error = Some(err.to_string());
                                    close.lock().last_event_id = local_id;
                                    return;
                                }
                                None => {
                                    close.lock().reason = CloseReason::Completed;
                                    close.lock().last_event_id = local_id;
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
    };

    Sse::new(body)
}
