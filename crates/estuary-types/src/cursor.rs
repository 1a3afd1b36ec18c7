//! Opaque, time-bucketed response cursors.
//!
//! The `Stream-Cursor` returned on every read advances in fixed-size time
//! buckets rather than per-message, so a CDN can key on it without a new
//! cache entry for every append. When a client's own cursor is already at
//! or ahead of the current bucket (the request raced an edge cache that
//! hadn't rotated yet) the response jitters forward by a random handful of
//! buckets, which guarantees strict advancement and keeps such clients from
//! looping on a cache entry that never changes.

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorOptions {
    pub interval_seconds: u64,
    pub epoch: DateTime<Utc>,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            interval_seconds: 20,
            epoch: Utc.with_ymd_and_hms(2024, 10, 9, 0, 0, 0).unwrap(),
        }
    }
}

/// The bucket index for `now` under `options`.
pub fn calculate_cursor(options: CursorOptions) -> u64 {
    bucket_for(Utc::now(), options)
}

fn bucket_for(at: DateTime<Utc>, options: CursorOptions) -> u64 {
    let elapsed = (at - options.epoch).num_seconds().max(0) as u64;
    elapsed / options.interval_seconds.max(1)
}

/// Choose the cursor to hand back to a client that last held `client_cursor`.
///
/// - No prior cursor: the current bucket.
/// - Client behind the current bucket: the greater of the two (never move
///   a cursor backwards).
/// - Client at or ahead of the current bucket: jitter forward by 1-3600
///   buckets so the response is guaranteed to differ from what the client
///   already has.
pub fn generate_response_cursor(client_cursor: Option<u64>, options: CursorOptions) -> u64 {
    let current = calculate_cursor(options);
    match client_cursor {
        None => current,
        Some(client) if client < current => current.max(client),
        Some(client) => {
            let jitter = rand::rng().random_range(1..=3600u64);
            client + jitter
        }
    }
}

/// Decode an opaque cursor token back into its bucket index.
pub fn parse_cursor(token: &str) -> Option<u64> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()?;
    let array: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(array))
}

/// Encode a bucket index as the opaque wire token.
pub fn format_cursor(bucket: u64) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bucket.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> CursorOptions {
        CursorOptions::default()
    }

    #[test]
    fn format_and_parse_roundtrip() {
        let token = format_cursor(12345);
        assert_eq!(parse_cursor(&token), Some(12345));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_cursor("not-a-cursor!!"), None);
        assert_eq!(parse_cursor(""), None);
    }

    #[test]
    fn no_prior_cursor_returns_current_bucket() {
        let current = calculate_cursor(opts());
        assert_eq!(generate_response_cursor(None, opts()), current);
    }

    #[test]
    fn client_behind_gets_current_bucket() {
        let current = calculate_cursor(opts());
        assert_eq!(generate_response_cursor(Some(0), opts()), current);
    }

    #[test]
    fn client_at_or_ahead_jitters_strictly_forward() {
        let current = calculate_cursor(opts());
        let next = generate_response_cursor(Some(current), opts());
        assert!(next > current);
        let far_ahead = current + 10_000;
        let next2 = generate_response_cursor(Some(far_ahead), opts());
        assert!(next2 > far_ahead);
    }
}
