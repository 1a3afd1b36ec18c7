//! `GET ?live=sse` (spec §4.5/§4.8): catch-up replay followed by live
//! frames from the engine's SSE registry, forwarded as axum SSE events.
//! Collapsed into one process with the engine rather than bridging over an
//! internal WebSocket hop (see `DESIGN.md`); `ws.rs` still implements the
//! `ws-internal` upgrade the spec describes for a split deployment.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use estuary_engine::{LiveFrame, ReadRequest};
use estuary_types::Offset;
use futures::Stream;
use tracing::warn;

use crate::state::AppState;

pub async fn serve(
    state: AppState,
    path: estuary_types::StreamPath,
    offset: Offset,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = build_stream(state, path, offset);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    )
}

fn build_stream(
    state: AppState,
    path: estuary_types::StreamPath,
    mut offset: Offset,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let handle = match state.engine.handle_for(&path) {
            Ok(h) => h,
            Err(e) => {
                warn!(path = %path, error = %e.message, "sse: failed to resolve stream actor");
                return;
            }
        };

        if let Ok(catch_up) = handle
            .read(ReadRequest { offset, byte_cap: 1 << 20, client_cursor: None })
            .await
        {
            for msg in &catch_up.messages {
                let data = String::from_utf8_lossy(&msg.payload).into_owned();
                yield Ok(Event::default().event("data").data(data));
            }
            offset = catch_up.next_offset;
            let control = serde_json::json!({
                "streamNextOffset": catch_up.next_offset.encode(),
                "streamCursor": catch_up.cursor,
                "upToDate": catch_up.up_to_date,
                "streamClosed": catch_up.stream_closed,
            });
            yield Ok(Event::default().event("control").data(control.to_string()));
            if catch_up.stream_closed {
                return;
            }
        }

        let (client_id, mut rx) = match handle.register_sse().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(path = %path, error = %e.message, "sse: failed to register live client");
                return;
            }
        };

        loop {
            match rx.recv().await {
                Some(LiveFrame::Data { payload, base64 }) => {
                    let data = if base64 {
                        use base64::Engine;
                        base64::engine::general_purpose::STANDARD.encode(&payload)
                    } else {
                        String::from_utf8_lossy(&payload).into_owned()
                    };
                    yield Ok(Event::default().event("data").data(data));
                }
                Some(LiveFrame::Control(control)) => {
                    let closed = control.stream_closed.unwrap_or(false);
                    yield Ok(Event::default()
                        .event("control")
                        .data(serde_json::to_string(&control).unwrap_or_default()));
                    if closed {
                        break;
                    }
                }
                None => break,
            }
        }

        handle.unregister_sse(client_id).await;
    }
}
