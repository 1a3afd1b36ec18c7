//! SSE-over-WebSocket bridge (spec §4.8): for `GET ?live=sse`, the edge
//! opens an internal WebSocket to the engine rather than registering its
//! own SSE client, so a client's SSE connection survives an edge restart
//! mid-stream by reconnecting the internal WS leg independently.
//!
//! This module only does the frame translation; opening the actual
//! WebSocket upgrade and writing SSE bytes to the HTTP response is the
//! server layer's job (it owns the axum types).

use base64::Engine;
use estuary_engine::LiveFrame;

/// One translated SSE event: `(event name, data payload)`.
pub struct SseEvent {
    pub name: &'static str,
    pub data: String,
}

/// Translate one engine live frame into the SSE event the client receives.
/// Binary payloads are base64-encoded per `base64`; the engine decides
/// whether a given stream needs that (set when the WS upgrade happens with
/// `advertise_base64`).
pub fn to_sse_event(frame: LiveFrame, advertise_base64: bool) -> SseEvent {
    match frame {
        LiveFrame::Data { payload, base64 } => {
            let data = if base64 || advertise_base64 {
                base64::engine::general_purpose::STANDARD.encode(&payload)
            } else {
                String::from_utf8_lossy(&payload).into_owned()
            };
            SseEvent { name: "data", data }
        }
        LiveFrame::Control(control) => SseEvent {
            name: "control",
            data: serde_json::to_string(&control).unwrap_or_else(|_| "{}".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estuary_engine::ControlFrame;

    #[test]
    fn data_frame_is_left_as_utf8_when_not_base64() {
        let event = to_sse_event(
            LiveFrame::Data {
                payload: b"hello".to_vec(),
                base64: false,
            },
            false,
        );
        assert_eq!(event.name, "data");
        assert_eq!(event.data, "hello");
    }

    #[test]
    fn data_frame_is_base64_encoded_when_advertised() {
        let event = to_sse_event(
            LiveFrame::Data {
                payload: b"hi".to_vec(),
                base64: false,
            },
            true,
        );
        assert_eq!(event.data, base64::engine::general_purpose::STANDARD.encode(b"hi"));
    }

    #[test]
    fn control_frame_serializes_to_json() {
        let event = to_sse_event(
            LiveFrame::Control(ControlFrame {
                stream_next_offset: "abc".to_string(),
                stream_cursor: None,
                stream_write_timestamp: None,
                stream_closed: None,
                up_to_date: Some(true),
            }),
            false,
        );
        assert_eq!(event.name, "control");
        assert!(event.data.contains("\"upToDate\":true"));
    }
}
