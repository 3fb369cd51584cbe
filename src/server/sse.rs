//! The per-run event stream, served as server-sent events.
//!
//! One live connection per run: subscribing supersedes and disconnects any
//! prior stream. There is no replay across reconnects — the first event on a
//! new connection is `connected`, after which a client that missed events
//! must call the snapshot endpoint to resynchronize.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::Stream;
use futures_util::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::SharedState;
use super::api::ApiError;
use crate::events::{EventEnvelope, RunEvent};

pub async fn events_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    // Reject streams for unknown runs before holding a subscription.
    state.controller.snapshot(&id).await?;

    let rx = state.hub.subscribe(&id);
    state
        .hub
        .emit(&id, RunEvent::Connected { run_id: id.clone() });

    let stream = UnboundedReceiverStream::new(rx).map(|envelope| Ok(to_sse_event(&envelope)));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

fn to_sse_event(envelope: &EventEnvelope) -> SseEvent {
    let event = SseEvent::default()
        .event(envelope.event.name())
        .id(envelope.seq.to_string());
    match event.json_data(envelope) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize event envelope");
            SseEvent::default().event("error").data("serialization error")
        }
    }
}
