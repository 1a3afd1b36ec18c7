//! Per-estuary reverse index of subscribed source streams (spec §4.7),
//! backed by the `est:<project>/<estuary_id>:<source_stream>` key family.

use std::sync::Arc;

use estuary_storage::MetadataRegistry;
use estuary_types::StreamPath;

fn est_prefix(project: &str, estuary_id: &str) -> String {
    format!("est:{project}/{estuary_id}:")
}

fn est_key(project: &str, estuary_id: &str, source: &StreamPath) -> String {
    format!("est:{project}/{estuary_id}:{source}")
}

pub struct EstuaryIndex {
    registry: Arc<dyn MetadataRegistry>,
}

impl EstuaryIndex {
    pub fn new(registry: Arc<dyn MetadataRegistry>) -> Self {
        Self { registry }
    }

    pub async fn add_subscription(&self, project: &str, estuary_id: &str, source: &StreamPath, now_ms: i64) {
        self.registry
            .put(&est_key(project, estuary_id, source), serde_json::json!({ "subscribed_at": now_ms }))
            .await;
    }

    pub async fn remove_subscription(&self, project: &str, estuary_id: &str, source: &StreamPath) {
        let _ = self.registry.delete(&est_key(project, estuary_id, source)).await;
    }

    /// The source stream paths this estuary is currently subscribed to.
    pub async fn list(&self, project: &str, estuary_id: &str) -> Vec<StreamPath> {
        let prefix = est_prefix(project, estuary_id);
        self.registry
            .list(&prefix)
            .await
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).and_then(|rest| StreamPath::parse(rest).ok()))
            .collect()
    }

    pub async fn clear(&self, project: &str, estuary_id: &str) {
        let prefix = est_prefix(project, estuary_id);
        for key in self.registry.list(&prefix).await {
            let _ = self.registry.delete(&key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estuary_storage::InMemoryRegistry;

    #[tokio::test]
    async fn add_list_remove_round_trip() {
        let idx = EstuaryIndex::new(Arc::new(InMemoryRegistry::new()));
        let a = StreamPath::parse("acme/a").unwrap();
        let b = StreamPath::parse("acme/b").unwrap();

        idx.add_subscription("acme", "e1", &a, 1).await;
        idx.add_subscription("acme", "e1", &b, 2).await;
        let mut list = idx.list("acme", "e1").await;
        list.sort_by_key(|p| p.to_string());
        assert_eq!(list, vec![a.clone(), b.clone()]);

        idx.remove_subscription("acme", "e1", &a).await;
        assert_eq!(idx.list("acme", "e1").await, vec![b]);
    }

    #[tokio::test]
    async fn clear_removes_everything_for_one_estuary() {
        let idx = EstuaryIndex::new(Arc::new(InMemoryRegistry::new()));
        let a = StreamPath::parse("acme/a").unwrap();
        idx.add_subscription("acme", "e1", &a, 1).await;
        idx.clear("acme", "e1").await;
        assert!(idx.list("acme", "e1").await.is_empty());
    }
}
