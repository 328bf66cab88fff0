//! Guarded SSE framing.
//!
//! Whatever the turn driver does, a framed stream delivers at most one
//! terminal `done` (preceded by `error` when something failed), and nothing
//! after it. A driver that dies without terminating its stream gets an
//! `error` + `done` synthesized on its behalf.

use axum::response::sse::Event;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::events::{AgentEvent, AgentEventKind};

/// Headers every SSE response carries alongside `text/event-stream`.
pub const SSE_HEADERS: [(&str, &str); 2] =
    [("Cache-Control", "no-cache"), ("X-Accel-Buffering", "no")];

/// Render one agent event as an SSE frame.
pub fn frame(event: &AgentEvent) -> Event {
    let sse = event.to_sse();
    Event::default().event(sse.event).data(sse.data.to_string())
}

/// Wrap a turn's event channel into a guarded SSE stream.
pub fn guarded_stream(
    mut rx: mpsc::Receiver<AgentEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let mut done_sent = false;
        while let Some(event) = rx.recv().await {
            if done_sent {
                break;
            }
            let terminal = event.is_terminal();
            yield Ok(frame(&event));
            if terminal {
                done_sent = true;
                break;
            }
        }
        if !done_sent {
            // The driver went away without closing the stream.
            let error = AgentEvent {
                dialog_id: None,
                kind: AgentEventKind::Error {
                    error: "stream ended unexpectedly".to_string(),
                },
            };
            yield Ok(frame(&error));
            let done = AgentEvent {
                dialog_id: None,
                kind: AgentEventKind::Done,
            };
            yield Ok(frame(&done));
        }
    }
}
