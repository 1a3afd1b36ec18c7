//! Per-source-stream subscriber registry (spec §4.7), backed by the shared
//! metadata registry's `sub:<project>/<stream>:<estuary_id>` key family
//! (spec §6 persisted state layout).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use estuary_storage::MetadataRegistry;
use estuary_types::StreamPath;

fn sub_prefix(source: &StreamPath) -> String {
    format!("sub:{source}:")
}

fn sub_key(source: &StreamPath, estuary_id: &str) -> String {
    format!("sub:{source}:{estuary_id}")
}

pub struct SubscriberRegistry {
    registry: Arc<dyn MetadataRegistry>,
    /// Per-source monotonic fan-out dispatch counter. Process-local: a
    /// restart resets it, which only affects the queued-path idempotent
    /// producer seq namespace, not correctness (see DESIGN.md).
    fanout_seq: DashMap<StreamPath, AtomicU64>,
}

impl SubscriberRegistry {
    pub fn new(registry: Arc<dyn MetadataRegistry>) -> Self {
        Self {
            registry,
            fanout_seq: DashMap::new(),
        }
    }

    pub async fn add_subscriber(&self, source: &StreamPath, estuary_id: &str, now_ms: i64) {
        self.registry
            .put(&sub_key(source, estuary_id), serde_json::json!({ "subscribed_at": now_ms }))
            .await;
    }

    pub async fn remove_subscriber(&self, source: &StreamPath, estuary_id: &str) {
        let _ = self.registry.delete(&sub_key(source, estuary_id)).await;
    }

    pub async fn remove_subscribers(&self, source: &StreamPath, estuary_ids: &[String]) {
        for id in estuary_ids {
            self.remove_subscriber(source, id).await;
        }
    }

    pub async fn list(&self, source: &StreamPath) -> Vec<String> {
        let prefix = sub_prefix(source);
        self.registry
            .list(&prefix)
            .await
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn next_fanout_seq(&self, source: &StreamPath) -> u64 {
        self.fanout_seq
            .entry(source.clone())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
    }
}
