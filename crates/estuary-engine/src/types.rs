//! Request/outcome DTOs passed across the actor mailbox boundary (spec §4.5).
//! These are framework-agnostic: `estuary-server` translates HTTP requests
//! into these and these back into HTTP responses.

use estuary_storage::OpRow;
use estuary_types::{Offset, ProducerHeaders};

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub content_type: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub expires_at: Option<i64>,
    pub close: bool,
    pub public: bool,
    pub initial_data: Option<Vec<u8>>,
    pub producer: Option<ProducerHeaders>,
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub created: bool,
    pub next_offset: Offset,
    pub expires_at: Option<i64>,
    pub closed: bool,
    pub reader_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub payload: Vec<u8>,
    pub content_type: String,
    pub producer: Option<ProducerHeaders>,
    pub close: bool,
}

#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub next_offset: Offset,
    pub accepted_offset: Offset,
    pub duplicate: bool,
    pub producer_received_seq: Option<i64>,
    pub stream_closed: bool,
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub offset: Offset,
    pub byte_cap: usize,
    pub client_cursor: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub messages: Vec<OpRow>,
    pub next_offset: Offset,
    pub up_to_date: bool,
    pub stream_closed: bool,
    pub content_type: String,
    pub cursor: String,
}

#[derive(Debug, Clone)]
pub struct HeadOutcome {
    pub content_type: String,
    pub closed: bool,
    pub public: bool,
    pub tail: Offset,
    pub expires_at: Option<i64>,
    pub reader_key: Option<String>,
}
