//! Shared SSE stream builders.
//!
//! Each event goes out as `id: <monotonic-int>` / `event: <type>` /
//! `data: <json>`; meta events (id 0) omit the `id:` field so client
//! `Last-Event-ID` tracking is undisturbed. Replay and live delivery
//! are stitched together with a strict id filter, so a listener sees
//! each id at most once, in order.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures_core::Stream;

use tr_domain::{StoredEvent, TaskKey};

use crate::state::AppState;

pub fn sse_record(record: &StoredEvent) -> Event {
    let mut event = Event::default()
        .event(record.event.event_type())
        .data(serde_json::to_string(&record.event).unwrap_or_default());
    if record.id > 0 {
        event = event.id(record.id.to_string());
    }
    event
}

/// Stream for a running task: optional status snapshot, replay of
/// logged events after `after_id`, then live events until terminal.
pub fn live_task_stream(
    state: AppState,
    key: TaskKey,
    after_id: u64,
    snapshot: Option<StoredEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        if let Some(snap) = &snapshot {
            yield Ok(sse_record(snap));
        }

        // Attach before reading the log: anything appended from here on
        // lands in the queue, anything before is in the replay.
        let (listener_id, mut rx) = state.manager.add_listener(&key);

        let replay = match state.manager.read_events_since(&key, after_id).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(task = %key, error = %e, "event replay failed");
                state.manager.remove_listener(&key, listener_id);
                yield Ok(Event::default().event("error").data(
                    serde_json::json!({
                        "type": "error", "kind": "internal", "message": "event replay failed"
                    })
                    .to_string(),
                ));
                return;
            }
        };

        let mut last = after_id;
        let mut terminal = false;
        for record in replay {
            last = record.id;
            terminal = record.event.is_terminal();
            yield Ok(sse_record(&record));
            if terminal {
                break;
            }
        }

        if !terminal {
            while let Some(record) = rx.recv().await {
                // Replay overlap: live queue may hold ids we already sent.
                if record.id != 0 && record.id <= last {
                    continue;
                }
                if record.id != 0 {
                    last = record.id;
                }
                let is_terminal = record.event.is_terminal();
                yield Ok(sse_record(&record));
                if is_terminal {
                    break;
                }
            }
        }

        state.manager.remove_listener(&key, listener_id);
    }
}

/// Finite stream for a terminal task: snapshot, then the stored events
/// after `after_id`, then close.
pub fn replay_stream(
    snapshot: Option<StoredEvent>,
    events: Vec<StoredEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        if let Some(snap) = &snapshot {
            yield Ok(sse_record(snap));
        }
        for record in events {
            yield Ok(sse_record(&record));
        }
    }
}

