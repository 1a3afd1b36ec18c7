//! Hot-to-cold rotation (spec §4.5 "Rotation (internal)").
//!
//! Runs inline inside the stream's single-writer actor, so there is never
//! more than one rotation in flight for a given stream (the mailbox
//! serialises it for free — no separate re-entrancy guard is needed).

use estuary_storage::{NewSegment, ObjectStore, OpRow, StoreError};
use estuary_types::Offset;

use crate::config::EngineConfig;

/// Recover the per-message `OpRow`s a rotated segment's blob was built
/// from: the inverse of the length-prefixed encoding `maybe_rotate` writes.
/// `start_offset` is the segment's `SegmentRow::start_offset`, since stream
/// sequence and cumulative byte offset both need to be replayed forward
/// from there. Write timestamp and producer metadata aren't preserved in
/// cold storage, so they come back as defaults; catch-up framing only ever
/// needs `offset` and `payload`.
pub fn decode_segment_blob(blob: &[u8], start_offset: Offset) -> Vec<OpRow> {
    let mut rows = Vec::new();
    let mut pos = 0usize;
    let mut stream_seq = start_offset.stream_seq;
    let mut byte_offset = start_offset.byte_offset;

    while pos + 4 <= blob.len() {
        let len = u32::from_le_bytes(blob[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if pos + len > blob.len() {
            break;
        }
        let payload = blob[pos..pos + len].to_vec();
        pos += len;

        rows.push(OpRow {
            offset: Offset::new(stream_seq, byte_offset),
            payload,
            write_ts: 0,
            producer_id: None,
            producer_epoch: None,
            producer_seq: None,
        });

        stream_seq += 1;
        byte_offset += len as u64;
    }

    rows
}

/// Rotate hot ops into one cold segment if either threshold is exceeded.
/// Returns `true` if a rotation happened.
pub async fn maybe_rotate(
    hot: &mut estuary_storage::HotStore,
    cold: &dyn ObjectStore,
    project: &str,
    stream: &str,
    config: &EngineConfig,
) -> Result<bool, StoreError> {
    let meta = match hot.get_stream()? {
        Some(m) => m,
        None => return Ok(false),
    };

    let next_seq = hot
        .list_segments()?
        .last()
        .map(|s| s.end_seq + 1)
        .unwrap_or(0);
    let threshold = Offset::new(next_seq, 0);

    let (count, bytes) = hot.ops_stats_from(threshold)?;
    if count <= config.segment_max_messages && bytes <= config.segment_max_bytes {
        return Ok(false);
    }

    let rows = hot.list_ops_from(threshold, config.segment_max_bytes as usize)?;
    let rows: Vec<_> = rows
        .into_iter()
        .take(config.segment_max_messages as usize)
        .collect();
    let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
        return Ok(false);
    };

    let start_offset = first.offset;
    let end_offset = Offset::new(
        last.offset.stream_seq,
        last.offset.byte_offset + last.payload.len() as u64,
    );
    let start_seq = start_offset.stream_seq;
    let end_seq = last.offset.stream_seq;
    let byte_len: u64 = rows.iter().map(|r| r.payload.len() as u64).sum();

    let key = estuary_storage::segment_key(project, stream, start_seq, end_seq);
    // Each message is stored as a `u32` little-endian length prefix followed
    // by its raw payload, so a later read can recover per-message
    // boundaries from the blob alone (the stream's own byte offsets are
    // cumulative payload bytes and can't be used to split it back up).
    let mut blob = Vec::with_capacity(byte_len as usize + rows.len() * 4);
    for row in &rows {
        blob.extend_from_slice(&(row.payload.len() as u32).to_le_bytes());
        blob.extend_from_slice(&row.payload);
    }

    // Segment write precedes the hot-delete transaction: if the process
    // crashes between them, the next rotation recomputes the identical
    // key and blob (same starting seq, same ops) and safely rewrites.
    cold.put(&key, blob, &meta.content_type)
        .await
        .map_err(|_| StoreError::NotFound)?;

    hot.rotate_into_segment(NewSegment {
        start_seq,
        end_seq,
        start_offset,
        end_offset,
        byte_len,
        object_key: key,
        content_type: meta.content_type,
    })?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use estuary_storage::{HotStore, InMemoryObjectStore, NewOp, NewStream};

    fn new_hot() -> HotStore {
        let s = HotStore::open_in_memory().unwrap();
        s.create_stream(NewStream {
            content_type: "text/plain".into(),
            created_at: 0,
            expires_at: None,
            reader_key: None,
        })
        .unwrap();
        s
    }

    #[tokio::test]
    async fn rotates_when_message_count_exceeds_cap() {
        let mut hot = new_hot();
        let cold = InMemoryObjectStore::new();
        let config = EngineConfig {
            segment_max_messages: 3,
            ..Default::default()
        };

        for i in 0..5u8 {
            hot.append(
                NewOp {
                    payload: vec![i],
                    write_ts: i as i64,
                    producer_id: None,
                    producer_epoch: None,
                    producer_seq: None,
                },
                false,
            )
            .unwrap();
        }

        let rotated = maybe_rotate(&mut hot, &cold, "p", "s", &config).await.unwrap();
        assert!(rotated);

        let segs = hot.list_segments().unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].start_seq, 0);
        assert_eq!(segs[0].end_seq, 2);

        let remaining = hot.list_ops_from(Offset::new(0, 0), usize::MAX).unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn no_rotation_below_thresholds() {
        let mut hot = new_hot();
        let cold = InMemoryObjectStore::new();
        let config = EngineConfig::default();

        hot.append(
            NewOp {
                payload: b"hi".to_vec(),
                write_ts: 0,
                producer_id: None,
                producer_epoch: None,
                producer_seq: None,
            },
            false,
        )
        .unwrap();

        let rotated = maybe_rotate(&mut hot, &cold, "p", "s", &config).await.unwrap();
        assert!(!rotated);
    }

    #[tokio::test]
    async fn repeat_rotation_with_same_start_is_idempotent() {
        let mut hot = new_hot();
        let cold = InMemoryObjectStore::new();
        let config = EngineConfig {
            segment_max_messages: 2,
            ..Default::default()
        };

        for i in 0..2u8 {
            hot.append(
                NewOp {
                    payload: vec![i],
                    write_ts: 0,
                    producer_id: None,
                    producer_epoch: None,
                    producer_seq: None,
                },
                false,
            )
            .unwrap();
        }

        assert!(maybe_rotate(&mut hot, &cold, "p", "s", &config).await.unwrap());
        // Simulate re-running rotation on a fresh append below threshold:
        // nothing new to rotate, should be a no-op rather than erroring.
        assert!(!maybe_rotate(&mut hot, &cold, "p", "s", &config).await.unwrap());
    }

    #[tokio::test]
    async fn rotated_segment_blob_decodes_back_into_the_original_messages() {
        let mut hot = new_hot();
        let cold = InMemoryObjectStore::new();
        let config = EngineConfig {
            segment_max_messages: 3,
            ..Default::default()
        };

        for i in 0..3u8 {
            hot.append(
                NewOp {
                    payload: vec![i, i],
                    write_ts: 0,
                    producer_id: None,
                    producer_epoch: None,
                    producer_seq: None,
                },
                false,
            )
            .unwrap();
        }
        assert!(maybe_rotate(&mut hot, &cold, "p", "s", &config).await.unwrap());

        let seg = &hot.list_segments().unwrap()[0];
        let blob = cold.get(&seg.object_key, 0).await.unwrap();
        let rows = decode_segment_blob(&blob, seg.start_offset);

        assert_eq!(rows.len(), 3);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.payload, vec![i as u8, i as u8]);
            assert_eq!(row.offset.stream_seq, i as u64);
        }
    }
}
