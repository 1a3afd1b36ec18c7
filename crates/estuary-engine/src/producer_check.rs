//! Idempotent-producer admission rule (spec §4.5 "Append"), shared by the
//! create-with-initial-data and append paths.

use estuary_storage::ProducerState;
use estuary_types::{ApiError, ErrorCode, ProducerHeaders};

#[derive(Debug, Clone, Copy)]
pub struct ProducerCheck {
    pub should_append: bool,
    pub duplicate_seq: Option<i64>,
}

/// Decide whether `headers` advances the producer's state, replays a prior
/// accepted append, or must be rejected outright.
pub fn check_producer(
    prior: Option<ProducerState>,
    headers: &ProducerHeaders,
) -> Result<ProducerCheck, ApiError> {
    let fresh = ProducerCheck {
        should_append: true,
        duplicate_seq: None,
    };

    match prior {
        None => {
            if headers.seq != 0 {
                return Err(ApiError::new(
                    ErrorCode::ProducerSeqMustStartAtZero,
                    "first append for a new producer must use seq 0",
                ));
            }
            Ok(fresh)
        }
        Some(state) => {
            if headers.epoch < state.epoch {
                return Err(ApiError::new(
                    ErrorCode::StaleProducerEpoch,
                    format!("producer epoch {} is stale (current {})", headers.epoch, state.epoch),
                ));
            }
            if headers.epoch > state.epoch {
                if headers.seq != 0 {
                    return Err(ApiError::new(
                        ErrorCode::ProducerSeqMustStartAtZero,
                        "first append under a new epoch must use seq 0",
                    ));
                }
                return Ok(fresh);
            }
            // same epoch
            if headers.seq == state.seq + 1 {
                Ok(fresh)
            } else if headers.seq <= state.seq {
                Ok(ProducerCheck {
                    should_append: false,
                    duplicate_seq: Some(state.seq),
                })
            } else {
                Err(ApiError::new(
                    ErrorCode::ProducerSequenceGap,
                    format!("expected seq {}, got {}", state.seq + 1, headers.seq),
                )
                .with_expected_seq(state.seq + 1))
            }
        }
    }
}
