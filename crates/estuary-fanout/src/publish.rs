//! Publish dispatch: append to the source stream, then fan the payload out
//! to every subscribed estuary's sink stream (spec §4.7).
//!
//! Dispatch steps, mirroring the spec prose:
//! 1. Append the payload to the source stream.
//! 2. List the source stream's subscribers.
//! 3. Partition subscribers: up to `MAX_INLINE_FANOUT` dispatch inline,
//!    the rest (and everything, if the breaker is open) go to the queue.
//! 4. Dispatch the inline share with bounded concurrency, pruning
//!    subscribers whose sink stream has disappeared and tripping/closing
//!    the breaker on failure/success.
//! 5. Batch the queued share at `fanout_batch_size` and hand each batch to
//!    the `FanoutQueue`.

use std::sync::Arc;

use dashmap::DashMap;
use estuary_engine::{AppendOutcome, AppendRequest, EngineRegistry};
use estuary_types::{ApiError, ErrorCode, ProducerHeaders, ProducerId, StreamPath};
use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::breaker::CircuitBreaker;
use crate::queue::{FanoutQueue, QueuedBatch};
use crate::subscriber_registry::SubscriberRegistry;

/// Subscribers beyond this count (per publish) are always routed through
/// the queue, even with the breaker closed.
pub const MAX_INLINE_FANOUT: usize = 200;
/// Subscriber count per queued batch.
pub const FANOUT_BATCH_SIZE: usize = 200;
/// Consecutive inline-dispatch failures (subscriber-count weighted) before
/// a source stream's breaker trips open.
const FAILURE_THRESHOLD: u32 = 5;
const RECOVERY: std::time::Duration = std::time::Duration::from_secs(30);
/// Bounded concurrency for inline fan-out appends.
const INLINE_CONCURRENCY: usize = 16;

#[derive(Debug, Clone)]
pub struct PublishResult {
    pub outcome: AppendOutcome,
    pub subscriber_count: usize,
    pub inline_successes: usize,
    pub inline_failures: usize,
    pub queued_batches: usize,
}

pub struct FanoutEngine {
    engine: Arc<EngineRegistry>,
    subscribers: Arc<SubscriberRegistry>,
    queue: Arc<dyn FanoutQueue>,
    breakers: DashMap<StreamPath, Arc<CircuitBreaker>>,
}

impl FanoutEngine {
    pub fn new(
        engine: Arc<EngineRegistry>,
        subscribers: Arc<SubscriberRegistry>,
        queue: Arc<dyn FanoutQueue>,
    ) -> Self {
        Self {
            engine,
            subscribers,
            queue,
            breakers: DashMap::new(),
        }
    }

    fn breaker_for(&self, source: &StreamPath) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(source.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(FAILURE_THRESHOLD, RECOVERY)))
            .clone()
    }

    pub async fn publish(
        &self,
        source: &StreamPath,
        req: AppendRequest,
    ) -> Result<PublishResult, ApiError> {
        let payload = req.payload.clone();
        let content_type = req.content_type.clone();

        let source_handle = self.engine.handle_for(source)?;
        let append = source_handle.append(req).await?;

        let subscriber_ids = self.subscribers.list(source).await;
        let mut result = PublishResult {
            outcome: append,
            subscriber_count: subscriber_ids.len(),
            inline_successes: 0,
            inline_failures: 0,
            queued_batches: 0,
        };
        if subscriber_ids.is_empty() {
            return Ok(result);
        }

        let breaker = self.breaker_for(source);
        let fanout_seq = self.subscribers.next_fanout_seq(source);

        let (inline_ids, queued_ids): (Vec<String>, Vec<String>) = if breaker.allows_inline() {
            if subscriber_ids.len() > MAX_INLINE_FANOUT {
                let (head, tail) = subscriber_ids.split_at(MAX_INLINE_FANOUT);
                (head.to_vec(), tail.to_vec())
            } else {
                (subscriber_ids, Vec::new())
            }
        } else {
            (Vec::new(), subscriber_ids)
        };

        if !inline_ids.is_empty() {
            let stale = self
                .dispatch_inline(source, &inline_ids, &payload, &content_type, fanout_seq, &mut result)
                .await;
            if !stale.is_empty() {
                self.subscribers.remove_subscribers(source, &stale).await;
            }
            // A partial failure still counts as a success for breaker
            // purposes; only a total wipeout opens the circuit.
            if result.inline_failures == inline_ids.len() {
                breaker.record_failure();
            }
            if result.inline_successes > 0 {
                breaker.record_success();
            }
        }

        if !queued_ids.is_empty() {
            result.queued_batches = self
                .dispatch_queued(source, &queued_ids, &payload, &content_type, fanout_seq)
                .await;
        }

        Ok(result)
    }

    async fn dispatch_inline(
        &self,
        source: &StreamPath,
        subscriber_ids: &[String],
        payload: &[u8],
        content_type: &str,
        fanout_seq: u64,
        result: &mut PublishResult,
    ) -> Vec<String> {
        let outcomes = stream::iter(subscriber_ids.iter().enumerate())
            .map(|(idx, estuary_id)| {
                self.dispatch_one(source, estuary_id, payload, content_type, fanout_seq, idx as i64)
            })
            .buffer_unordered(INLINE_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        let mut stale = Vec::new();
        for (estuary_id, outcome) in subscriber_ids.iter().zip(outcomes) {
            match outcome {
                Ok(()) => result.inline_successes += 1,
                Err(err) if err.code == ErrorCode::StreamNotFound => {
                    stale.push(estuary_id.clone());
                }
                Err(err) => {
                    warn!(estuary = %estuary_id, error = %err.message, "inline fan-out delivery failed");
                    result.inline_failures += 1;
                }
            }
        }
        stale
    }

    async fn dispatch_one(
        &self,
        source: &StreamPath,
        estuary_id: &str,
        payload: &[u8],
        content_type: &str,
        fanout_seq: u64,
        subscriber_index: i64,
    ) -> Result<(), ApiError> {
        let sink = StreamPath::sink(source.project(), estuary_id)
            .map_err(|e| ApiError::new(ErrorCode::InternalError, e.to_string()))?;
        let handle = self.engine.handle_for(&sink)?;
        let producer = ProducerHeaders {
            id: ProducerId::parse(&format!("fanout:{source}:{fanout_seq}"))?,
            epoch: 0,
            seq: subscriber_index,
        };
        handle
            .append(AppendRequest {
                payload: payload.to_vec(),
                content_type: content_type.to_string(),
                producer: Some(producer),
                close: false,
            })
            .await?;
        Ok(())
    }

    async fn dispatch_queued(
        &self,
        source: &StreamPath,
        subscriber_ids: &[String],
        payload: &[u8],
        content_type: &str,
        fanout_seq: u64,
    ) -> usize {
        let mut batches = 0;
        for chunk in subscriber_ids.chunks(FANOUT_BATCH_SIZE) {
            let batch = QueuedBatch {
                project: source.project().to_string(),
                source_stream: source.to_string(),
                subscriber_ids: chunk.to_vec(),
                payload: payload.to_vec(),
                content_type: content_type.to_string(),
                fanout_seq,
            };
            if let Err(err) = self.queue.send(batch).await {
                warn!(source = %source, error = %err, "failed to enqueue fan-out batch");
            }
            batches += 1;
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use estuary_engine::{CreateRequest, EngineConfig, HotStorageMode};
    use estuary_storage::{InMemoryObjectStore, InMemoryRegistry};

    async fn new_estuary(engine: &EngineRegistry, project: &str, estuary_id: &str) {
        let path = StreamPath::parse(&format!("{project}/{estuary_id}")).unwrap();
        engine
            .handle_for(&path)
            .unwrap()
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
    }

    fn fanout_engine() -> (Arc<EngineRegistry>, Arc<SubscriberRegistry>, FanoutEngine) {
        let registry = Arc::new(InMemoryRegistry::new());
        let engine = Arc::new(EngineRegistry::new(
            Arc::new(InMemoryObjectStore::new()),
            registry.clone(),
            EngineConfig::default(),
            HotStorageMode::InMemory,
        ));
        let subscribers = Arc::new(SubscriberRegistry::new(registry));
        let queue = Arc::new(InMemoryQueue::new());
        let fanout = FanoutEngine::new(engine.clone(), subscribers.clone(), queue);
        (engine, subscribers, fanout)
    }

    #[tokio::test]
    async fn publish_delivers_inline_to_all_subscribers() {
        let (engine, subscribers, fanout) = fanout_engine();
        let source = StreamPath::parse("acme/orders").unwrap();
        engine
            .handle_for(&source)
            .unwrap()
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

        new_estuary(&engine, "acme", "e1").await;
        new_estuary(&engine, "acme", "e2").await;
        subscribers.add_subscriber(&source, "e1", 1).await;
        subscribers.add_subscriber(&source, "e2", 1).await;

        let result = fanout
            .publish(
                &source,
                AppendRequest {
                    payload: b"hello".to_vec(),
                    content_type: "text/plain".into(),
                    producer: None,
                    close: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.subscriber_count, 2);
        assert_eq!(result.inline_successes, 2);
        assert_eq!(result.inline_failures, 0);
        assert_eq!(result.queued_batches, 0);

        let sink = StreamPath::parse("acme/e1").unwrap();
        let head = engine.handle_for(&sink).unwrap().head().await.unwrap();
        assert_eq!(head.tail.stream_seq, 1);
    }

    #[tokio::test]
    async fn publish_prunes_subscribers_whose_sink_is_gone() {
        let (engine, subscribers, fanout) = fanout_engine();
        let source = StreamPath::parse("acme/orders").unwrap();
        engine
            .handle_for(&source)
            .unwrap()
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

        // Subscribed, but its sink stream was never created.
        subscribers.add_subscriber(&source, "ghost", 1).await;

        let result = fanout
            .publish(
                &source,
                AppendRequest {
                    payload: b"hello".to_vec(),
                    content_type: "text/plain".into(),
                    producer: None,
                    close: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.inline_failures, 0);
        assert!(subscribers.list(&source).await.is_empty());
    }

    #[tokio::test]
    async fn publish_over_inline_cap_spills_to_the_queue() {
        let (engine, subscribers, fanout) = fanout_engine();
        let source = StreamPath::parse("acme/orders").unwrap();
        engine
            .handle_for(&source)
            .unwrap()
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

        for i in 0..(MAX_INLINE_FANOUT + 5) {
            let id = format!("e{i}");
            new_estuary(&engine, "acme", &id).await;
            subscribers.add_subscriber(&source, &id, 1).await;
        }

        let result = fanout
            .publish(
                &source,
                AppendRequest {
                    payload: b"hello".to_vec(),
                    content_type: "text/plain".into(),
                    producer: None,
                    close: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.inline_successes, MAX_INLINE_FANOUT);
        assert_eq!(result.queued_batches, 1);
    }
}
