//! SSE event stream with backlog replay
//!
//! Subscribers with a `run_id` filter get the persisted backlog first, then
//! live bus events; ordering within the run follows event timestamps.
//! Keepalive comments flow on idle connections.

use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use relay_events::{EventBus, EventKind, EventStatus, RunEvent, SubscriberId};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

const SUBSCRIBER_BUFFER: usize = 256;
const BACKLOG_LIMIT: usize = 500;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamFilter {
    pub run_id: Option<String>,
    pub kind: Option<String>,
    pub status: Option<String>,
}

impl StreamFilter {
    fn matches(&self, event: &RunEvent) -> bool {
        if let Some(run_id) = &self.run_id {
            if &event.run_id != run_id {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            match kind.parse::<EventKind>() {
                Ok(kind) if event.kind == kind => {}
                _ => return false,
            }
        }
        if let Some(status) = &self.status {
            match status.parse::<EventStatus>() {
                Ok(status) if event.status == status => {}
                _ => return false,
            }
        }
        true
    }
}

/// Drops the bus subscription when the SSE connection goes away
struct SubscriptionGuard {
    bus: Arc<EventBus>,
    id: SubscriberId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

fn sse_event(event: &RunEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.kind.to_string()).data(data)
}

pub async fn stream_events(
    State(state): State<AppState>,
    Query(filter): Query<StreamFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before reading backlog so no event can fall between the
    // two phases; duplicates are possible, losses are not.
    let (id, mut rx) = state.bus.subscribe(SUBSCRIBER_BUFFER);
    let guard = SubscriptionGuard {
        bus: state.bus.clone(),
        id,
    };
    let events = state.events.clone();

    let stream = async_stream::stream! {
        let _guard = guard;

        if let Some(run_id) = &filter.run_id {
            match events.list_events(run_id, BACKLOG_LIMIT).await {
                Ok(backlog) => {
                    for event in backlog.iter().filter(|e| filter.matches(e)) {
                        yield Ok(sse_event(event));
                    }
                }
                Err(e) => {
                    tracing::warn!(run_id = %run_id, error = %e, "backlog replay failed");
                }
            }
        }

        while let Some(event) = rx.recv().await {
            if filter.matches(&event) {
                yield Ok(sse_event(&event));
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    )
}
