//! Idempotent-producer header triple: `(id, epoch, seq)`.

use crate::error::{ApiError, ErrorCode};

const MAX_ID_LEN: usize = 256;
/// Fits in 63 bits, per spec §4.5.
const MAX_VALUE: i64 = i64::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerId(String);

impl ProducerId {
    pub fn parse(s: &str) -> Result<Self, ApiError> {
        if s.is_empty() || s.len() > MAX_ID_LEN {
            return Err(ApiError::new(
                ErrorCode::ProducerIdInvalid,
                "producer id must be non-empty and at most 256 chars",
            ));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A producer header triple parsed and range-checked, but not yet validated
/// against prior state (that's the engine's job).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerHeaders {
    pub id: ProducerId,
    pub epoch: i64,
    pub seq: i64,
}

impl ProducerHeaders {
    /// Parse the three headers together. Per spec: if any is present, all
    /// three must be present.
    pub fn from_parts(
        id: Option<&str>,
        epoch: Option<&str>,
        seq: Option<&str>,
    ) -> Result<Option<Self>, ApiError> {
        match (id, epoch, seq) {
            (None, None, None) => Ok(None),
            (Some(id), Some(epoch), Some(seq)) => {
                let id = ProducerId::parse(id)?;
                let epoch = parse_non_negative(epoch)?;
                let seq = parse_non_negative(seq)?;
                Ok(Some(ProducerHeaders { id, epoch, seq }))
            }
            _ => Err(ApiError::new(
                ErrorCode::ProducerHeadersIncomplete,
                "producer id, epoch and seq must all be present or all absent",
            )),
        }
    }
}

fn parse_non_negative(s: &str) -> Result<i64, ApiError> {
    let v: i64 = s.parse().map_err(|_| {
        ApiError::new(
            ErrorCode::ProducerEpochSeqNotIntegers,
            "producer epoch/seq must be integers",
        )
    })?;
    if v < 0 {
        return Err(ApiError::new(
            ErrorCode::ProducerEpochSeqNotIntegers,
            "producer epoch/seq must be non-negative",
        ));
    }
    if v > MAX_VALUE {
        return Err(ApiError::new(
            ErrorCode::ProducerEpochSeqOverflow,
            "producer epoch/seq overflow 63 bits",
        ));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_absent_is_none() {
        assert_eq!(ProducerHeaders::from_parts(None, None, None).unwrap(), None);
    }

    #[test]
    fn partial_presence_is_incomplete() {
        let err = ProducerHeaders::from_parts(Some("x"), None, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProducerHeadersIncomplete);
    }

    #[test]
    fn full_triple_parses() {
        let ph = ProducerHeaders::from_parts(Some("x"), Some("0"), Some("1"))
            .unwrap()
            .unwrap();
        assert_eq!(ph.id.as_str(), "x");
        assert_eq!(ph.epoch, 0);
        assert_eq!(ph.seq, 1);
    }

    #[test]
    fn rejects_negative_and_non_integer() {
        assert!(ProducerHeaders::from_parts(Some("x"), Some("-1"), Some("0")).is_err());
        assert!(ProducerHeaders::from_parts(Some("x"), Some("a"), Some("0")).is_err());
    }

    #[test]
    fn rejects_empty_or_overlong_id() {
        assert!(ProducerId::parse("").is_err());
        assert!(ProducerId::parse(&"a".repeat(257)).is_err());
        assert!(ProducerId::parse(&"a".repeat(256)).is_ok());
    }
}
