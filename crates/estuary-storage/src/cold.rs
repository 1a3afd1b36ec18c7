//! Cold storage: a content-addressed, write-once object store for rotated
//! segments (spec §4.3). Keys are `<project>/<stream>/segments/<start
//! _seq>-<end_seq>.bin`, filesystem-truncated with a hash suffix when the
//! natural key would be too long for the backend.

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColdError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the canonical cold-storage key for a segment.
pub fn segment_key(project: &str, stream: &str, start_seq: u64, end_seq: u64) -> String {
    let key = format!("{project}/{stream}/segments/{start_seq}-{end_seq}.bin");
    truncate_key(&key)
}

const MAX_KEY_LEN: usize = 900;

fn truncate_key(key: &str) -> String {
    if key.len() <= MAX_KEY_LEN {
        return key.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let hash = hex::encode(hasher.finalize());
    format!("{}~{}", &key[..MAX_KEY_LEN - 20], &hash[..16])
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), ColdError>;
    /// Read the object, starting at `byte_offset` within it.
    async fn get(&self, key: &str, byte_offset: u64) -> Result<Vec<u8>, ColdError>;
    async fn delete(&self, key: &str) -> Result<(), ColdError>;
}

/// In-memory backend, used in tests and as a fallback when no data
/// directory is configured.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<String, (Vec<u8>, String)>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), ColdError> {
        self.objects
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn get(&self, key: &str, byte_offset: u64) -> Result<Vec<u8>, ColdError> {
        let entry = self
            .objects
            .get(key)
            .ok_or_else(|| ColdError::NotFound(key.to_string()))?;
        let (bytes, _) = entry.value();
        let start = (byte_offset as usize).min(bytes.len());
        Ok(bytes[start..].to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), ColdError> {
        self.objects.remove(key);
        Ok(())
    }
}

/// Filesystem-backed object store for local/self-hosted deployments.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Object keys are content-addressed, not attacker controlled, but
        // we still keep them inside `root` by encoding path separators.
        let flattened = key.replace('/', "_");
        self.root.join(flattened)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<(), ColdError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(key);
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str, byte_offset: u64) -> Result<Vec<u8>, ColdError> {
        let path = self.path_for(key);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| ColdError::NotFound(key.to_string()))?;
        let start = (byte_offset as usize).min(bytes.len());
        Ok(bytes[start..].to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), ColdError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ColdError::Io(e)),
        }
    }
}
