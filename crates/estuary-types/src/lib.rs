//! Shared, framework-agnostic types for the estuary streaming service:
//! opaque offsets, stream paths, content-type normalisation, the
//! idempotent-producer header triple, and the wire error taxonomy.

pub mod content_type;
pub mod cursor;
pub mod error;
pub mod offset;
pub mod path;
pub mod producer;

pub use content_type::{
    content_types_match, is_json, normalize as normalize_content_type, DEFAULT_CONTENT_TYPE,
    JSON_CONTENT_TYPE,
};
pub use cursor::{
    calculate_cursor, format_cursor, generate_response_cursor, parse_cursor, CursorOptions,
};
pub use error::{ApiError, ErrorBody, ErrorCode};
pub use offset::{resolve_offset, Offset, OffsetError};
pub use path::{PathError, StreamPath};
pub use producer::{ProducerHeaders, ProducerId};
