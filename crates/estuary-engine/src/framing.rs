//! Catch-up response body framing (spec §4.5, pinned open question in
//! `SPEC_FULL.md` §2): JSON-typed streams are framed as a JSON array of
//! payloads; everything else uses length-prefixed binary records so a
//! client can split the body back into messages without re-parsing offsets.

use estuary_storage::OpRow;
use estuary_types::is_json;

pub fn format_messages(content_type: &str, messages: &[OpRow]) -> Vec<u8> {
    if is_json(content_type) {
        frame_json(messages)
    } else {
        frame_binary(messages)
    }
}

fn frame_json(messages: &[OpRow]) -> Vec<u8> {
    let mut out = Vec::with_capacity(messages.iter().map(|m| m.payload.len() + 1).sum::<usize>() + 2);
    out.push(b'[');
    for (i, m) in messages.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(&m.payload);
    }
    out.push(b']');
    out
}

/// `u32` little-endian length prefix followed by the raw payload, repeated
/// per message.
fn frame_binary(messages: &[OpRow]) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        messages.iter().map(|m| m.payload.len() + 4).sum(),
    );
    for m in messages {
        out.extend_from_slice(&(m.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&m.payload);
    }
    out
}
