//! Request header/query parsing shared by the stream and estuary routes.

use axum::http::HeaderMap;
use estuary_types::{ApiError, ErrorCode, ProducerHeaders};

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub fn content_type(headers: &HeaderMap) -> Option<String> {
    header_str(headers, axum::http::header::CONTENT_TYPE.as_str()).map(str::to_string)
}

pub fn stream_closed(headers: &HeaderMap) -> bool {
    header_str(headers, "Stream-Closed") == Some("true")
}

pub fn stream_ttl(headers: &HeaderMap) -> Result<Option<u64>, ApiError> {
    match header_str(headers, "Stream-TTL") {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ApiError::new(ErrorCode::StreamTtlMismatch, "Stream-TTL must be an integer")),
    }
}

pub fn stream_expires_at(headers: &HeaderMap) -> Result<Option<i64>, ApiError> {
    match header_str(headers, "Stream-Expires-At") {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ApiError::new(ErrorCode::InvalidExpiresAt, "Stream-Expires-At must be epoch ms")),
    }
}

pub fn producer_headers(headers: &HeaderMap) -> Result<Option<ProducerHeaders>, ApiError> {
    ProducerHeaders::from_parts(
        header_str(headers, "Producer-Id"),
        header_str(headers, "Producer-Epoch"),
        header_str(headers, "Producer-Seq"),
    )
}
