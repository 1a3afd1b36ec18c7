//! Queue interface consumed by the fan-out engine's non-inline path (spec
//! §6 "Queue interface (consumed)"). Delivery to subscribers that don't fit
//! the inline budget, or that are handled while the circuit breaker for a
//! source stream is open, is handed off here instead of appended directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// One batch of subscriber deliveries for a single publish, destined for a
/// single source stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedBatch {
    pub project: String,
    pub source_stream: String,
    pub subscriber_ids: Vec<String>,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub fanout_seq: u64,
}

#[async_trait]
pub trait FanoutQueue: Send + Sync {
    async fn send(&self, batch: QueuedBatch) -> Result<(), String>;
}

/// Test/single-process queue: holds batches in memory rather than handing
/// them to a real broker. Not meant for production use.
#[derive(Default)]
pub struct InMemoryQueue {
    sent: Mutex<Vec<QueuedBatch>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn drain(&self) -> Vec<QueuedBatch> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

#[async_trait]
impl FanoutQueue for InMemoryQueue {
    async fn send(&self, batch: QueuedBatch) -> Result<(), String> {
        self.sent.lock().await.push(batch);
        Ok(())
    }
}
