//! Metadata registry: a shared key/value store mapping project ids to
//! signing config and stream paths to their public/content-type/reader-key
//! summary (spec §4.4). Registry mutations are idempotent and the engine
//! tolerates stale entries, retrying deletes up to three times with linear
//! backoff.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectConfig {
    pub signing_secrets: Vec<String>,
    #[serde(default)]
    pub cors_origins: Option<Vec<String>>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMetaEntry {
    pub public: bool,
    pub content_type: String,
    pub created_at: i64,
    #[serde(default)]
    pub reader_key: Option<String>,
}

pub fn project_key(project_id: &str) -> String {
    format!("project:{project_id}")
}

pub fn stream_key(path: &str) -> String {
    format!("stream:{path}")
}

#[async_trait]
pub trait MetadataRegistry: Send + Sync {
    async fn get(&self, key: &str) -> Option<serde_json::Value>;
    async fn put(&self, key: &str, value: serde_json::Value);
    async fn delete(&self, key: &str) -> Result<(), String>;
    async fn list(&self, prefix: &str) -> Vec<String>;
}

/// Process-local, in-memory registry. Stands in for the shared KV store in
/// tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: DashMap<String, serde_json::Value>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataRegistry for InMemoryRegistry {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    async fn put(&self, key: &str, value: serde_json::Value) {
        self.entries.insert(key.to_string(), value);
    }

    async fn delete(&self, key: &str) -> Result<(), String> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect()
    }
}

/// Delete with up to 3 retries, linear backoff 100/200/300ms (spec §4.4).
/// Failure after the final attempt is logged and swallowed: the registry is
/// a best-effort cache of hot-storage truth, not the source of it.
pub async fn delete_with_retries(registry: &dyn MetadataRegistry, key: &str) {
    retry_linear(|| registry.delete(key)).await;
}

/// Retry an arbitrary fallible registry mutation 3x with linear backoff.
pub async fn retry_linear<F, Fut>(mut op: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    for attempt in 0..3u32 {
        match op().await {
            Ok(()) => return,
            Err(e) => {
                if attempt == 2 {
                    warn!(error = %e, "registry mutation failed after 3 attempts, giving up");
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100 * (attempt as u64 + 1))).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let reg = InMemoryRegistry::new();
        reg.put("project:acme", serde_json::json!({"signing_secrets": ["s1"]}))
            .await;
        assert!(reg.get("project:acme").await.is_some());
        reg.delete("project:acme").await;
        assert!(reg.get("project:acme").await.is_none());
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let reg = InMemoryRegistry::new();
        reg.put("stream:acme/a", serde_json::json!({})).await;
        reg.put("stream:acme/b", serde_json::json!({})).await;
        reg.put("project:acme", serde_json::json!({})).await;

        let mut streams = reg.list("stream:").await;
        streams.sort();
        assert_eq!(streams, vec!["stream:acme/a", "stream:acme/b"]);
    }

    #[tokio::test]
    async fn retry_linear_gives_up_after_three_attempts() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        retry_linear(|| {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err::<(), String>("boom".to_string()) }
        })
        .await;
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
