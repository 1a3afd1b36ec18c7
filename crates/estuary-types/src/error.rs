//! The stable wire error taxonomy (spec §7).
//!
//! `ApiError` is the tagged error domain code passes around internally;
//! translating it to an HTTP response (status, JSON body, CORS headers) is
//! the job of the collaborator at the request boundary (`estuary-server`),
//! not this crate.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,

    InvalidOffset,
    EmptyBody,
    EmptyQueryParam,
    InvalidContentLength,
    ContentLengthMismatch,
    ContentTypeRequired,
    MissingProjectOrStreamId,
    InvalidJson,
    OffsetRequired,
    OffsetBeyondTail,

    PayloadTooLarge,
    StorageQuotaExceeded,

    ContentTypeMismatch,
    StreamClosed,
    StreamClosedStatusMismatch,
    StreamTtlMismatch,
    StreamSeqRegression,
    InvalidExpiresAt,

    StaleProducerEpoch,
    ProducerSequenceGap,
    ProducerSeqMustStartAtZero,
    ProducerHeadersIncomplete,
    ProducerIdInvalid,
    ProducerEpochSeqNotIntegers,
    ProducerEpochSeqOverflow,
    ProducerEvalFailed,

    StreamNotFound,
    ProjectNotFound,

    SegmentUnavailable,
    SegmentMissing,
    SegmentTruncated,
    BatchBuildFailed,

    InternalError,

    TooManySseConnections,
    WebsocketUpgradeRequired,
}

impl ErrorCode {
    /// Default HTTP status for this code. Call sites may still override
    /// (e.g. cold-storage errors are 502 by default but some call sites
    /// choose 500 per spec §7).
    pub fn default_status(&self) -> u16 {
        use ErrorCode::*;
        match self {
            Unauthorized => 401,
            Forbidden => 403,

            InvalidOffset | EmptyBody | EmptyQueryParam | InvalidContentLength
            | ContentLengthMismatch | ContentTypeRequired | MissingProjectOrStreamId
            | InvalidJson | OffsetRequired | InvalidExpiresAt => 400,
            OffsetBeyondTail => 422,

            PayloadTooLarge => 413,
            StorageQuotaExceeded => 507,

            ContentTypeMismatch | StreamClosed | StreamClosedStatusMismatch
            | StreamTtlMismatch | StreamSeqRegression => 409,

            StaleProducerEpoch | ProducerSequenceGap | ProducerSeqMustStartAtZero => 409,
            ProducerHeadersIncomplete | ProducerIdInvalid | ProducerEpochSeqNotIntegers
            | ProducerEpochSeqOverflow => 422,
            ProducerEvalFailed => 409,

            StreamNotFound | ProjectNotFound => 404,

            SegmentUnavailable | SegmentMissing | SegmentTruncated => 502,
            BatchBuildFailed => 500,

            InternalError => 500,

            TooManySseConnections => 429,
            WebsocketUpgradeRequired => 426,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_value(self).unwrap_or_default();
        write!(f, "{}", json.as_str().unwrap_or("INTERNAL_ERROR"))
    }
}

/// A tagged domain error: `(status, code, message)`, plus the producer-seq
/// bookkeeping the append path needs to surface as response headers
/// (`Producer-Expected-Seq` on `PRODUCER_SEQUENCE_GAP`, `Producer-Received-Seq`
/// on an accepted duplicate).
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: u16,
    pub code: ErrorCode,
    pub message: String,
    pub expected_seq: Option<i64>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.default_status(),
            code,
            message: message.into(),
            expected_seq: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_expected_seq(mut self, seq: i64) -> Self {
        self.expected_seq = Some(seq);
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// The wire body for any error response: `{code, error}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub error: String,
}

impl From<&ApiError> for ErrorBody {
    fn from(e: &ApiError) -> Self {
        ErrorBody {
            code: e.code,
            error: e.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_statuses_match_spec_taxonomy() {
        assert_eq!(ErrorCode::StreamNotFound.default_status(), 404);
        assert_eq!(ErrorCode::PayloadTooLarge.default_status(), 413);
        assert_eq!(ErrorCode::ProducerSequenceGap.default_status(), 409);
        assert_eq!(ErrorCode::OffsetBeyondTail.default_status(), 422);
        assert_eq!(ErrorCode::SegmentMissing.default_status(), 502);
    }

    #[test]
    fn serializes_screaming_snake_case() {
        let v = serde_json::to_string(&ErrorCode::StreamNotFound).unwrap();
        assert_eq!(v, "\"STREAM_NOT_FOUND\"");
    }
}
