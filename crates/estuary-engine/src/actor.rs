//! The single-writer-per-stream actor (spec §9 design note): one mailbox,
//! one `HotStore`, processed serially so append ordering is free of locks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use estuary_storage::{HotStore, MetadataRegistry, NewOp, NewStream, ObjectStore, OpRow};
use estuary_types::{content_types_match, ApiError, ErrorCode, Offset, DEFAULT_CONTENT_TYPE};
use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::live::{ControlFrame, LiveFrame, LongPollQueue, SseRegistry, WsRegistry};
use crate::producer_check::check_producer;
use crate::rotation::{decode_segment_blob, maybe_rotate};
use crate::types::{
    AppendOutcome, AppendRequest, CreateOutcome, CreateRequest, HeadOutcome, ReadOutcome,
    ReadRequest,
};

pub enum Command {
    Create(CreateRequest, oneshot::Sender<Result<CreateOutcome, ApiError>>),
    Append(AppendRequest, oneshot::Sender<Result<AppendOutcome, ApiError>>),
    Read(ReadRequest, oneshot::Sender<Result<ReadOutcome, ApiError>>),
    Head(oneshot::Sender<Result<HeadOutcome, ApiError>>),
    Delete(oneshot::Sender<Result<(), ApiError>>),
    RegisterLongPoll(oneshot::Sender<oneshot::Receiver<()>>),
    RegisterSse(oneshot::Sender<(uuid::Uuid, mpsc::Receiver<LiveFrame>)>),
    UnregisterSse(uuid::Uuid),
    RegisterWs(mpsc::Sender<LiveFrame>, oneshot::Sender<uuid::Uuid>),
    UnregisterWs(uuid::Uuid),
}

fn generate_reader_key() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn store_err(e: estuary_storage::StoreError) -> ApiError {
    ApiError::new(ErrorCode::InternalError, e.to_string())
}

/// The current time bucket's cursor, for control frames pushed outside a
/// client read (append, delete) where there's no prior cursor to jitter
/// against.
fn current_cursor_token() -> String {
    estuary_types::format_cursor(estuary_types::calculate_cursor(
        estuary_types::CursorOptions::default(),
    ))
}

pub struct StreamActor {
    project: String,
    stream: String,
    hot: HotStore,
    cold: Arc<dyn ObjectStore>,
    registry: Arc<dyn MetadataRegistry>,
    config: EngineConfig,
    long_poll: LongPollQueue,
    sse: SseRegistry,
    ws: WsRegistry,
}

impl StreamActor {
    pub fn new(
        project: String,
        stream: String,
        hot: HotStore,
        cold: Arc<dyn ObjectStore>,
        registry: Arc<dyn MetadataRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            project,
            stream,
            hot,
            cold,
            registry,
            config,
            long_poll: LongPollQueue::default(),
            sse: SseRegistry::default(),
            ws: WsRegistry::default(),
        }
    }

    /// Drain the mailbox until it closes or no command arrives within the
    /// idle timeout, at which point the actor exits and the registry
    /// re-materialises a fresh one on the next request.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let idle = Duration::from_millis(self.config.actor_idle_timeout_ms);
        loop {
            match tokio::time::timeout(idle, rx.recv()).await {
                Ok(Some(cmd)) => self.handle(cmd).await,
                Ok(None) => break,
                Err(_elapsed) => {
                    debug!(project = %self.project, stream = %self.stream, "actor idle timeout, shutting down");
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Create(req, tx) => {
                let _ = tx.send(self.create(req).await);
            }
            Command::Append(req, tx) => {
                let _ = tx.send(self.append(req).await);
            }
            Command::Read(req, tx) => {
                let _ = tx.send(self.read(req).await);
            }
            Command::Head(tx) => {
                let _ = tx.send(self.head());
            }
            Command::Delete(tx) => {
                let _ = tx.send(self.delete().await);
            }
            Command::RegisterLongPoll(tx) => {
                self.long_poll.sweep_expired(Instant::now());
                let deadline = Instant::now() + Duration::from_millis(self.config.long_poll_max_ms);
                let _ = tx.send(self.long_poll.register(deadline));
            }
            Command::RegisterSse(tx) => {
                let _ = tx.send(self.sse.register());
            }
            Command::UnregisterSse(id) => self.sse.unregister(&id),
            Command::RegisterWs(sender, tx) => {
                let _ = tx.send(self.ws.attach(sender));
            }
            Command::UnregisterWs(id) => self.ws.detach(&id),
        }
    }

    async fn create(&mut self, req: CreateRequest) -> Result<CreateOutcome, ApiError> {
        if req.ttl_seconds.is_some() && req.expires_at.is_some() {
            return Err(ApiError::new(
                ErrorCode::InvalidExpiresAt,
                "set either Stream-TTL or Stream-Expires-At, not both",
            ));
        }
        let now = now_ms();
        if let Some(exp) = req.expires_at {
            if exp <= now {
                return Err(ApiError::new(
                    ErrorCode::InvalidExpiresAt,
                    "expires-at must be in the future",
                ));
            }
        }
        let expires_at = req
            .expires_at
            .or_else(|| req.ttl_seconds.map(|ttl| now + ttl as i64 * 1000));
        let content_type = req
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        if let Some(meta) = self.hot.get_stream().map_err(store_err)? {
            if !content_types_match(&meta.content_type, &content_type) {
                return Err(ApiError::new(
                    ErrorCode::ContentTypeMismatch,
                    "stream already exists with a different content type",
                ));
            }
            if meta.closed != req.close {
                return Err(ApiError::new(
                    ErrorCode::StreamClosedStatusMismatch,
                    "stream already exists with a different closed status",
                ));
            }
            if meta.expires_at != expires_at {
                return Err(ApiError::new(
                    ErrorCode::StreamTtlMismatch,
                    "stream already exists with a different expiry",
                ));
            }
            return Ok(CreateOutcome {
                created: false,
                next_offset: meta.tail(),
                expires_at: meta.expires_at,
                closed: meta.closed,
                reader_key: meta.reader_key,
            });
        }

        let reader_key = if req.public { None } else { Some(generate_reader_key()) };
        self.hot.create_stream(NewStream {
            content_type: content_type.clone(),
            created_at: now,
            expires_at,
            reader_key: reader_key.clone(),
        })
        .map_err(store_err)?;

        if let Some(data) = req.initial_data {
            let (producer_id, producer_epoch, producer_seq) = match &req.producer {
                Some(p) => {
                    check_producer(None, p)?;
                    (Some(p.id.as_str().to_string()), Some(p.epoch), Some(p.seq))
                }
                None => (None, None, None),
            };
            self.hot.append(
                NewOp {
                    payload: data,
                    write_ts: now,
                    producer_id,
                    producer_epoch,
                    producer_seq,
                },
                req.close,
            )
            .map_err(store_err)?;
        } else if req.close {
            self.hot.set_closed(true).map_err(store_err)?;
        }

        let meta = self.hot.get_stream().map_err(store_err)?.expect("just created");
        self.registry
            .put(
                &estuary_storage::stream_key(&format!("{}/{}", self.project, self.stream)),
                serde_json::json!({
                    "public": req.public,
                    "content_type": content_type,
                    "created_at": now,
                    "reader_key": reader_key,
                }),
            )
            .await;

        Ok(CreateOutcome {
            created: true,
            next_offset: meta.tail(),
            expires_at: meta.expires_at,
            closed: meta.closed,
            reader_key,
        })
    }

    async fn append(&mut self, req: AppendRequest) -> Result<AppendOutcome, ApiError> {
        let meta = self
            .hot
            .get_stream()
            .map_err(store_err)?
            .ok_or_else(|| ApiError::new(ErrorCode::StreamNotFound, "stream does not exist"))?;

        let now = now_ms();
        if meta.is_expired(now) {
            return Err(ApiError::new(ErrorCode::StreamNotFound, "stream has expired"));
        }
        if meta.closed {
            return Err(ApiError::new(ErrorCode::StreamClosed, "stream is closed"));
        }
        if !content_types_match(&meta.content_type, &req.content_type) {
            return Err(ApiError::new(
                ErrorCode::ContentTypeMismatch,
                "content-type does not match the stream's",
            ));
        }
        if req.payload.len() as u64 > self.config.max_payload_bytes {
            return Err(ApiError::new(ErrorCode::PayloadTooLarge, "payload exceeds max size"));
        }

        let mut duplicate_seq = None;
        let (producer_id, producer_epoch, producer_seq) = match &req.producer {
            Some(p) => {
                let prior = self.hot.get_producer(p.id.as_str()).map_err(store_err)?;
                let check = check_producer(prior, p)?;
                if !check.should_append {
                    duplicate_seq = check.duplicate_seq;
                }
                (Some(p.id.as_str().to_string()), Some(p.epoch), Some(p.seq))
            }
            None => (None, None, None),
        };

        if let Some(seq) = duplicate_seq {
            return Ok(AppendOutcome {
                next_offset: meta.tail(),
                accepted_offset: meta.tail(),
                duplicate: true,
                producer_received_seq: Some(seq),
                stream_closed: meta.closed,
            });
        }

        let accepted_offset = self.hot.append(
            NewOp {
                payload: req.payload,
                write_ts: now,
                producer_id,
                producer_epoch,
                producer_seq,
            },
            req.close,
        )
        .map_err(store_err)?;

        let meta = self.hot.get_stream().map_err(store_err)?.expect("just appended");

        if let Err(e) = maybe_rotate(&mut self.hot, self.cold.as_ref(), &self.project, &self.stream, &self.config).await
        {
            warn!(error = %e, project = %self.project, stream = %self.stream, "rotation failed");
        }

        self.long_poll.wake_all();
        self.sse.broadcast(LiveFrame::Control(ControlFrame {
            stream_next_offset: meta.tail().encode(),
            stream_cursor: Some(current_cursor_token()),
            stream_write_timestamp: Some(now),
            stream_closed: Some(meta.closed),
            up_to_date: Some(false),
        }));
        // The WS bridge lives in the edge layer; this is a wake-up nudge,
        // not the payload itself, so the bridge re-reads from its cursor.
        self.ws.broadcast(LiveFrame::Data {
            payload: vec![],
            base64: false,
        });

        Ok(AppendOutcome {
            next_offset: meta.tail(),
            accepted_offset,
            duplicate: false,
            producer_received_seq: req.producer.as_ref().map(|p| p.seq),
            stream_closed: meta.closed,
        })
    }

    /// Catch-up read, merging rotated cold segments with the hot tail
    /// (spec §4.5 steps 2-3): a read starting at or before a rotation
    /// boundary must see every message, not just what's left in `ops`
    /// after `rotate_into_segment` deleted the rotated rows.
    async fn read(&self, req: ReadRequest) -> Result<ReadOutcome, ApiError> {
        let meta = self
            .hot
            .get_stream()
            .map_err(store_err)?
            .ok_or_else(|| ApiError::new(ErrorCode::StreamNotFound, "stream does not exist"))?;

        let byte_cap = req.byte_cap.min(self.config.read_byte_cap);

        let segments = self.hot.list_segments().map_err(store_err)?;
        let mut candidates: Vec<OpRow> = Vec::new();
        for segment in segments.iter().filter(|s| s.end_seq >= req.offset.stream_seq) {
            let blob = self.cold.get(&segment.object_key, 0).await.map_err(|e| {
                ApiError::new(ErrorCode::SegmentUnavailable, e.to_string())
            })?;
            candidates.extend(decode_segment_blob(&blob, segment.start_offset));
        }
        candidates.extend(
            self.hot
                .list_ops_from(req.offset, usize::MAX)
                .map_err(store_err)?,
        );
        candidates.retain(|r| r.offset >= req.offset);

        let mut rows = Vec::new();
        let mut total = 0usize;
        for row in candidates {
            if !rows.is_empty() && total + row.payload.len() > byte_cap {
                break;
            }
            total += row.payload.len();
            rows.push(row);
            if total >= byte_cap {
                break;
            }
        }

        let tail = meta.tail();
        let next_offset = rows
            .last()
            .map(|r| Offset::new(r.offset.stream_seq, r.offset.byte_offset + r.payload.len() as u64))
            .unwrap_or(req.offset);

        let cursor = estuary_types::format_cursor(estuary_types::generate_response_cursor(
            req.client_cursor,
            estuary_types::CursorOptions::default(),
        ));

        Ok(ReadOutcome {
            up_to_date: next_offset >= tail,
            messages: rows,
            next_offset,
            stream_closed: meta.closed,
            content_type: meta.content_type,
            cursor,
        })
    }

    fn head(&self) -> Result<HeadOutcome, ApiError> {
        let meta = self
            .hot
            .get_stream()
            .map_err(store_err)?
            .ok_or_else(|| ApiError::new(ErrorCode::StreamNotFound, "stream does not exist"))?;
        Ok(HeadOutcome {
            content_type: meta.content_type,
            closed: meta.closed,
            public: meta.reader_key.is_none(),
            tail: meta.tail(),
            expires_at: meta.expires_at,
            reader_key: meta.reader_key,
        })
    }

    async fn delete(&mut self) -> Result<(), ApiError> {
        let keys = self.hot.delete_all().map_err(store_err)?;
        for key in keys {
            if let Err(e) = self.cold.delete(&key).await {
                warn!(error = %e, key, "cold segment delete failed, leaving for GC");
            }
        }
        estuary_storage::delete_with_retries(
            self.registry.as_ref(),
            &estuary_storage::stream_key(&format!("{}/{}", self.project, self.stream)),
        )
        .await;
        self.long_poll.wake_all();
        self.sse.broadcast(LiveFrame::Control(ControlFrame {
            stream_next_offset: Offset::BEGINNING.encode(),
            stream_cursor: Some(current_cursor_token()),
            stream_write_timestamp: None,
            stream_closed: Some(true),
            up_to_date: Some(true),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estuary_storage::{InMemoryObjectStore, InMemoryRegistry};
    use estuary_types::{ProducerHeaders, ProducerId};

    fn new_actor() -> StreamActor {
        StreamActor::new(
            "acme".into(),
            "orders".into(),
            HotStore::open_in_memory().unwrap(),
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(InMemoryRegistry::new()),
            EngineConfig::default(),
        )
    }

    fn new_actor_with_config(config: EngineConfig) -> StreamActor {
        StreamActor::new(
            "acme".into(),
            "orders".into(),
            HotStore::open_in_memory().unwrap(),
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(InMemoryRegistry::new()),
            config,
        )
    }

    fn producer(epoch: i64, seq: i64) -> ProducerHeaders {
        ProducerHeaders {
            id: ProducerId::parse("p1").unwrap(),
            epoch,
            seq,
        }
    }

    #[tokio::test]
    async fn create_then_append_then_read_round_trip() {
        let mut actor = new_actor();
        let created = actor
            .create(CreateRequest {
                content_type: Some("text/plain".into()),
                ttl_seconds: None,
                expires_at: None,
                close: false,
                public: true,
                initial_data: None,
                producer: None,
            })
            .await
            .unwrap();
        assert!(created.created);
        assert!(created.reader_key.is_none());

        let appended = actor
            .append(AppendRequest {
                payload: b"hello".to_vec(),
                content_type: "text/plain".into(),
                producer: None,
                close: false,
            })
            .await
            .unwrap();
        assert!(!appended.duplicate);

        let read = actor
            .read(ReadRequest {
                offset: Offset::BEGINNING,
                byte_cap: 4096,
                client_cursor: None,
            })
            .await
            .unwrap();
        assert_eq!(read.messages.len(), 1);
        assert_eq!(read.messages[0].payload, b"hello");
        assert!(read.up_to_date);
    }

    #[tokio::test]
    async fn read_from_the_beginning_sees_messages_rotated_into_cold_storage() {
        let mut actor = new_actor_with_config(EngineConfig {
            segment_max_messages: 3,
            ..EngineConfig::default()
        });
        actor
            .create(CreateRequest {
                content_type: Some("text/plain".into()),
                ttl_seconds: None,
                expires_at: None,
                close: false,
                public: true,
                initial_data: None,
                producer: None,
            })
            .await
            .unwrap();

        for i in 0..10u8 {
            actor
                .append(AppendRequest {
                    payload: vec![i],
                    content_type: "text/plain".into(),
                    producer: None,
                    close: false,
                })
                .await
                .unwrap();
        }

        // Rotation runs inline on append past the threshold, so by now some
        // of these messages only exist in cold storage.
        assert!(!actor.hot.list_segments().unwrap().is_empty());

        let read = actor
            .read(ReadRequest {
                offset: Offset::BEGINNING,
                byte_cap: 1 << 20,
                client_cursor: None,
            })
            .await
            .unwrap();

        assert_eq!(read.messages.len(), 10);
        for (i, msg) in read.messages.iter().enumerate() {
            assert_eq!(msg.payload, vec![i as u8]);
        }
        assert!(read.up_to_date);
    }

    #[tokio::test]
    async fn create_is_idempotent_on_matching_params() {
        let mut actor = new_actor();
        let req = || CreateRequest {
            content_type: Some("text/plain".into()),
            ttl_seconds: None,
            expires_at: None,
            close: false,
            public: true,
            initial_data: None,
            producer: None,
        };
        let first = actor.create(req()).await.unwrap();
        let second = actor.create(req()).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
    }

    #[tokio::test]
    async fn create_rejects_conflicting_content_type() {
        let mut actor = new_actor();
        actor
            .create(CreateRequest {
                content_type: Some("text/plain".into()),
                ttl_seconds: None,
                expires_at: None,
                close: false,
                public: true,
                initial_data: None,
                producer: None,
            })
            .await
            .unwrap();

        let err = actor
            .create(CreateRequest {
                content_type: Some("application/json".into()),
                ttl_seconds: None,
                expires_at: None,
                close: false,
                public: true,
                initial_data: None,
                producer: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ContentTypeMismatch);
    }

    #[tokio::test]
    async fn append_with_idempotent_producer_deduplicates() {
        let mut actor = new_actor();
        actor
            .create(CreateRequest {
                content_type: Some("text/plain".into()),
                ttl_seconds: None,
                expires_at: None,
                close: false,
                public: true,
                initial_data: None,
                producer: None,
            })
            .await
            .unwrap();

        let req = |seq: i64| AppendRequest {
            payload: b"x".to_vec(),
            content_type: "text/plain".into(),
            producer: Some(producer(0, seq)),
            close: false,
        };

        let first = actor.append(req(0)).await.unwrap();
        assert!(!first.duplicate);
        let replay = actor.append(req(0)).await.unwrap();
        assert!(replay.duplicate);
        assert_eq!(replay.producer_received_seq, Some(0));

        let gap = actor.append(req(5)).await.unwrap_err();
        assert_eq!(gap.code, ErrorCode::ProducerSequenceGap);
        assert_eq!(gap.expected_seq, Some(1));
    }

    #[tokio::test]
    async fn append_to_closed_stream_is_rejected() {
        let mut actor = new_actor();
        actor
            .create(CreateRequest {
                content_type: Some("text/plain".into()),
                ttl_seconds: None,
                expires_at: None,
                close: true,
                public: true,
                initial_data: None,
                producer: None,
            })
            .await
            .unwrap();

        let err = actor
            .append(AppendRequest {
                payload: b"x".to_vec(),
                content_type: "text/plain".into(),
                producer: None,
                close: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::StreamClosed);
    }

    #[tokio::test]
    async fn delete_clears_hot_storage() {
        let mut actor = new_actor();
        actor
            .create(CreateRequest {
                content_type: Some("text/plain".into()),
                ttl_seconds: None,
                expires_at: None,
                close: false,
                public: true,
                initial_data: None,
                producer: None,
            })
            .await
            .unwrap();
        actor.delete().await.unwrap();
        let err = actor.head().unwrap_err();
        assert_eq!(err.code, ErrorCode::StreamNotFound);
    }
}
