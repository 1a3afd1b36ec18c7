//! Estuary lifecycle: TTL tracking and alarm-fired teardown (spec §4.7).
//!
//! Each estuary carries a renewable expiry. When it fires, every source
//! stream it subscribed to has its subscription removed, the estuary's
//! sink stream is deleted, and the reverse index is cleared.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use estuary_engine::EngineRegistry;
use estuary_types::StreamPath;
use tracing::warn;

use crate::estuary_index::EstuaryIndex;
use crate::subscriber_registry::SubscriberRegistry;

/// Source streams are unsubscribed in batches this size during teardown.
const UNSUBSCRIBE_BATCH: usize = 20;

pub struct EstuaryLifecycleManager {
    engine: Arc<EngineRegistry>,
    subscribers: Arc<SubscriberRegistry>,
    index: Arc<EstuaryIndex>,
    expirations: DashMap<(String, String), AtomicI64>,
}

impl EstuaryLifecycleManager {
    pub fn new(
        engine: Arc<EngineRegistry>,
        subscribers: Arc<SubscriberRegistry>,
        index: Arc<EstuaryIndex>,
    ) -> Self {
        Self {
            engine,
            subscribers,
            index,
            expirations: DashMap::new(),
        }
    }

    /// Renew (or set) an estuary's expiry, returning the new deadline.
    pub fn touch(&self, project: &str, estuary_id: &str, now_ms: i64, ttl_seconds: u64) -> i64 {
        let expires_at = now_ms + (ttl_seconds as i64) * 1000;
        let key = (project.to_string(), estuary_id.to_string());
        match self.expirations.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(e) => {
                e.get().store(expires_at, Ordering::SeqCst);
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(AtomicI64::new(expires_at));
            }
        }
        expires_at
    }

    /// The current deadline for an estuary, if it has one.
    pub fn expires_at(&self, project: &str, estuary_id: &str) -> Option<i64> {
        self.expirations
            .get(&(project.to_string(), estuary_id.to_string()))
            .map(|e| e.load(Ordering::SeqCst))
    }

    pub fn forget(&self, project: &str, estuary_id: &str) {
        self.expirations
            .remove(&(project.to_string(), estuary_id.to_string()));
    }

    /// All `(project, estuary_id)` pairs whose deadline has passed.
    pub fn expired(&self, now_ms: i64) -> Vec<(String, String)> {
        self.expirations
            .iter()
            .filter(|entry| entry.value().load(Ordering::SeqCst) <= now_ms)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Run the alarm-fire teardown for every currently expired estuary.
    pub async fn sweep(&self, now_ms: i64) {
        for (project, estuary_id) in self.expired(now_ms) {
            self.expire_one(&project, &estuary_id).await;
        }
    }

    /// Tear down a single estuary: unsubscribe from every source stream it
    /// held, delete its sink stream, and drop local bookkeeping.
    pub async fn expire_one(&self, project: &str, estuary_id: &str) {
        let sources = self.index.list(project, estuary_id).await;
        for chunk in sources.chunks(UNSUBSCRIBE_BATCH) {
            for source in chunk {
                self.subscribers.remove_subscriber(source, estuary_id).await;
            }
        }

        if let Ok(sink) = StreamPath::sink(project, estuary_id) {
            if let Ok(handle) = self.engine.handle_for(&sink) {
                if let Err(err) = handle.delete().await {
                    warn!(project, estuary_id, error = %err.message, "failed to delete expired estuary sink");
                }
            }
            self.engine.forget(&sink);
        }

        self.index.clear(project, estuary_id).await;
        self.forget(project, estuary_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estuary_engine::{CreateRequest, EngineConfig, HotStorageMode};
    use estuary_storage::{InMemoryObjectStore, InMemoryRegistry};

    fn setup() -> (Arc<EngineRegistry>, Arc<SubscriberRegistry>, Arc<EstuaryIndex>, EstuaryLifecycleManager) {
        let registry = Arc::new(InMemoryRegistry::new());
        let engine = Arc::new(EngineRegistry::new(
            Arc::new(InMemoryObjectStore::new()),
            registry.clone(),
            EngineConfig::default(),
            HotStorageMode::InMemory,
        ));
        let subscribers = Arc::new(SubscriberRegistry::new(registry.clone()));
        let index = Arc::new(EstuaryIndex::new(registry));
        let lifecycle = EstuaryLifecycleManager::new(engine.clone(), subscribers.clone(), index.clone());
        (engine, subscribers, index, lifecycle)
    }

    #[tokio::test]
    async fn touch_then_expired_lists_it_once_due() {
        let (.., lifecycle) = setup();
        lifecycle.touch("acme", "e1", 1_000, 10);
        assert!(lifecycle.expired(5_000).is_empty());
        assert_eq!(lifecycle.expired(20_000), vec![("acme".to_string(), "e1".to_string())]);
    }

    #[tokio::test]
    async fn expires_at_reflects_the_latest_touch() {
        let (.., lifecycle) = setup();
        assert_eq!(lifecycle.expires_at("acme", "e1"), None);
        lifecycle.touch("acme", "e1", 1_000, 10);
        assert_eq!(lifecycle.expires_at("acme", "e1"), Some(11_000));
        lifecycle.touch("acme", "e1", 2_000, 10);
        assert_eq!(lifecycle.expires_at("acme", "e1"), Some(12_000));
    }

    #[tokio::test]
    async fn expire_one_tears_down_subscriptions_and_sink() {
        let (engine, subscribers, index, lifecycle) = setup();
        let sink = StreamPath::sink("acme", "e1").unwrap();
        engine
            .handle_for(&sink)
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

        let source = StreamPath::parse("acme/orders").unwrap();
        subscribers.add_subscriber(&source, "e1", 1).await;
        index.add_subscription("acme", "e1", &source, 1).await;
        lifecycle.touch("acme", "e1", 1_000, 10);

        lifecycle.expire_one("acme", "e1").await;

        assert!(subscribers.list(&source).await.is_empty());
        assert!(index.list("acme", "e1").await.is_empty());
        assert!(lifecycle.expired(100_000).is_empty());
        assert!(engine.handle_for(&sink).unwrap().head().await.is_err());
    }
}
