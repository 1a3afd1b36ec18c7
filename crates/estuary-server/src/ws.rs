//! `GET ?live=ws-internal` (spec §4.5): the WebSocket variant of live reads,
//! used by estuary fan-out sinks and any client that prefers a socket over
//! SSE. Frames mirror the SSE bridge's shape (`estuary-edge::bridge`) so a
//! future edge process can translate one into the other without touching
//! the engine.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use estuary_engine::{LiveFrame, ReadRequest};
use estuary_types::{resolve_offset, ApiError, ErrorCode};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::ApiErrorResponse;
use crate::stream_routes::ReadQuery;
use crate::state::AppState;

fn path_of(project: &str, stream: &str) -> Result<estuary_types::StreamPath, ApiError> {
    estuary_types::StreamPath::parse(&format!("{project}/{stream}"))
        .map_err(|e| ApiError::new(ErrorCode::MissingProjectOrStreamId, e.to_string()))
}

pub async fn upgrade(
    State(state): State<AppState>,
    Path((project, stream)): Path<(String, String)>,
    Query(query): Query<ReadQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match path_of(&project, &stream) {
        Ok(path) => ws.on_upgrade(move |socket| handle_socket(state, path, query, socket)),
        Err(e) => axum::response::IntoResponse::into_response(ApiErrorResponse(e)),
    }
}

async fn handle_socket(
    state: AppState,
    path: estuary_types::StreamPath,
    query: ReadQuery,
    mut socket: WebSocket,
) {
    let handle = match state.engine.handle_for(&path) {
        Ok(h) => h,
        Err(e) => {
            warn!(path = %path, error = %e.message, "ws: failed to resolve stream actor");
            let _ = socket.close().await;
            return;
        }
    };

    let tail = match handle.head().await {
        Ok(h) => h.tail,
        Err(_) => estuary_types::Offset::BEGINNING,
    };
    let offset = match resolve_offset(query.offset.as_deref(), tail) {
        Ok(o) => o,
        Err(_) => tail,
    };

    if let Ok(catch_up) = handle
        .read(ReadRequest {
            offset,
            byte_cap: 1 << 20,
            client_cursor: None,
        })
        .await
    {
        for msg in &catch_up.messages {
            if socket.send(Message::Binary(msg.payload.clone().into())).await.is_err() {
                return;
            }
        }
        if catch_up.stream_closed {
            let _ = socket.close().await;
            return;
        }
    }

    let (tx, mut rx): (mpsc::Sender<LiveFrame>, mpsc::Receiver<LiveFrame>) = mpsc::channel(256);
    let client_id = match handle.register_ws(tx).await {
        Ok(id) => id,
        Err(e) => {
            warn!(path = %path, error = %e.message, "ws: failed to register live client");
            let _ = socket.close().await;
            return;
        }
    };

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(LiveFrame::Data { payload, .. }) => {
                        if socket.send(Message::Binary(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(LiveFrame::Control(control)) => {
                        let closed = control.stream_closed.unwrap_or(false);
                        if let Ok(text) = serde_json::to_string(&control) {
                            if socket.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        if closed {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    handle.unregister_ws(client_id).await;
}
