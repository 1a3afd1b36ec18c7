//! Opaque stream offsets.
//!
//! An offset is a 32-character lowercase hex token: the first 16 chars are
//! the stream's `stream_seq` at the time of the message, the second 16 are
//! the byte offset within the stream. Ordering is lexicographic on the hex
//! string, which is also the intended total order.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OffsetError {
    #[error("invalid offset: {0}")]
    Invalid(String),
    #[error("offset beyond tail")]
    BeyondTail,
}

/// A decoded `(stream_seq, byte_offset)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset {
    pub stream_seq: u64,
    pub byte_offset: u64,
}

impl Offset {
    pub const BEGINNING: Offset = Offset {
        stream_seq: 0,
        byte_offset: 0,
    };

    pub fn new(stream_seq: u64, byte_offset: u64) -> Self {
        Self {
            stream_seq,
            byte_offset,
        }
    }

    /// Encode as the 32-char lowercase hex wire token.
    pub fn encode(&self) -> String {
        format!("{:016x}{:016x}", self.stream_seq, self.byte_offset)
    }

    /// Decode a 32-char lowercase hex wire token.
    pub fn decode(s: &str) -> Result<Self, OffsetError> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(OffsetError::Invalid(s.to_string()));
        }
        let stream_seq = u64::from_str_radix(&s[0..16], 16)
            .map_err(|_| OffsetError::Invalid(s.to_string()))?;
        let byte_offset = u64::from_str_radix(&s[16..32], 16)
            .map_err(|_| OffsetError::Invalid(s.to_string()))?;
        Ok(Offset {
            stream_seq,
            byte_offset,
        })
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl PartialOrd<str> for Offset {
    fn partial_cmp(&self, other: &str) -> Option<Ordering> {
        Some(self.encode().as_str().cmp(other))
    }
}

/// Resolve an offset query parameter against the stream's current tail.
///
/// Accepts an opaque 32-char token, the literal `-1` or `now` (meaning
/// "the current tail"), or `None` (meaning "the beginning"). A decoded
/// offset strictly beyond the tail is rejected.
pub fn resolve_offset(param: Option<&str>, tail: Offset) -> Result<Offset, OffsetError> {
    match param {
        None => Ok(Offset::BEGINNING),
        Some("-1") | Some("now") => Ok(tail),
        Some(s) if s.is_empty() => Err(OffsetError::Invalid(s.to_string())),
        Some(s) => {
            let off = Offset::decode(s)?;
            if off > tail {
                return Err(OffsetError::BeyondTail);
            }
            Ok(off)
        }
    }
}
