//! Translates the framework-agnostic `ApiError` into an HTTP response
//! (spec §7): JSON `{code, error}` body, `Cache-Control: no-store`, and the
//! producer-seq bookkeeping headers on the two codes that carry one.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use estuary_types::{ApiError, ErrorBody, ErrorCode};

/// Local wrapper so `IntoResponse` can be implemented here without running
/// into the orphan rule (`ApiError` and `IntoResponse` are both foreign to
/// this crate).
pub struct ApiErrorResponse(pub ApiError);

impl From<ApiError> for ApiErrorResponse {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody::from(&err);
        let mut response = (status, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

        if let (ErrorCode::ProducerSequenceGap, Some(seq)) = (err.code, err.expected_seq) {
            if let Ok(value) = HeaderValue::from_str(&seq.to_string()) {
                response.headers_mut().insert("Producer-Expected-Seq", value);
            }
        }

        response
    }
}
