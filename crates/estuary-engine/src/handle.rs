//! Public façade over a stream's actor: a cheap, cloneable handle plus the
//! keyed registry that spawns and evicts actors (spec §9 design note: "a
//! keyed actor map `path → mailbox`... when idle for T seconds, evict").

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use estuary_storage::{HotStore, MetadataRegistry, ObjectStore};
use estuary_types::{ApiError, ErrorCode, StreamPath};
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use uuid::Uuid;

use crate::actor::{Command, StreamActor};
use crate::config::EngineConfig;
use crate::live::LiveFrame;
use crate::types::{AppendOutcome, AppendRequest, CreateOutcome, CreateRequest, HeadOutcome, ReadOutcome, ReadRequest};

const MAILBOX_CAPACITY: usize = 256;

fn internal_err() -> ApiError {
    ApiError::new(ErrorCode::InternalError, "stream actor unavailable")
}

/// A lightweight, cloneable reference to one stream's actor mailbox.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        f: impl FnOnce(oneshot::Sender<Result<T, ApiError>>) -> Command,
    ) -> Result<T, ApiError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(f(tx))
            .await
            .map_err(|_| internal_err())?;
        rx.await.map_err(|_| internal_err())?
    }

    pub async fn create(&self, req: CreateRequest) -> Result<CreateOutcome, ApiError> {
        self.call(|tx| Command::Create(req, tx)).await
    }

    pub async fn append(&self, req: AppendRequest) -> Result<AppendOutcome, ApiError> {
        self.call(|tx| Command::Append(req, tx)).await
    }

    pub async fn read(&self, req: ReadRequest) -> Result<ReadOutcome, ApiError> {
        self.call(|tx| Command::Read(req, tx)).await
    }

    pub async fn head(&self) -> Result<HeadOutcome, ApiError> {
        self.call(Command::Head).await
    }

    pub async fn delete(&self) -> Result<(), ApiError> {
        self.call(Command::Delete).await
    }

    /// Read, and if already caught up to the tail, park until the next
    /// append, the deadline, or cancellation (dropping this future releases
    /// the waiter immediately; the queue also sweeps expired entries).
    pub async fn read_long_poll(
        &self,
        req: ReadRequest,
        timeout_ms: u64,
    ) -> Result<ReadOutcome, ApiError> {
        let first = self.read(req.clone()).await?;
        if !first.up_to_date || first.stream_closed {
            return Ok(first);
        }

        let (reg_tx, reg_rx) = oneshot::channel();
        self.tx
            .send(Command::RegisterLongPoll(reg_tx))
            .await
            .map_err(|_| internal_err())?;
        let notified = reg_rx.await.map_err(|_| internal_err())?;

        match tokio::time::timeout(Duration::from_millis(timeout_ms), notified).await {
            Ok(_) => self.read(req).await,
            Err(_) => Ok(ReadOutcome {
                messages: Vec::new(),
                next_offset: first.next_offset,
                up_to_date: true,
                stream_closed: first.stream_closed,
                content_type: first.content_type,
                cursor: first.cursor,
            }),
        }
    }

    pub async fn register_sse(&self) -> Result<(Uuid, mpsc::Receiver<LiveFrame>), ApiError> {
        self.call(Command::RegisterSse).await
    }

    pub async fn unregister_sse(&self, id: Uuid) {
        let _ = self.tx.send(Command::UnregisterSse(id)).await;
    }

    pub async fn register_ws(&self, sender: mpsc::Sender<LiveFrame>) -> Result<Uuid, ApiError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::RegisterWs(sender, tx))
            .await
            .map_err(|_| internal_err())?;
        rx.await.map_err(|_| internal_err())
    }

    pub async fn unregister_ws(&self, id: Uuid) {
        let _ = self.tx.send(Command::UnregisterWs(id)).await;
    }
}

/// Where a stream's hot store lives: in-memory (ephemeral, lost on actor
/// eviction) or file-backed under a data directory (re-materialises from
/// disk on the next request after eviction).
pub enum HotStorageMode {
    InMemory,
    Dir(PathBuf),
}

fn open_hot_store(mode: &HotStorageMode, path: &StreamPath) -> Result<HotStore, ApiError> {
    match mode {
        HotStorageMode::InMemory => {
            HotStore::open_in_memory().map_err(|e| ApiError::new(ErrorCode::InternalError, e.to_string()))
        }
        HotStorageMode::Dir(dir) => {
            let file = dir.join(format!("{}.sqlite3", path.to_string().replace('/', "__")));
            HotStore::open_file(&file).map_err(|e| ApiError::new(ErrorCode::InternalError, e.to_string()))
        }
    }
}

/// Keyed map of live stream actors. Spawns one on first use, reuses it
/// while the mailbox stays open, and transparently respawns after an idle
/// eviction.
pub struct EngineRegistry {
    actors: DashMap<StreamPath, mpsc::Sender<Command>>,
    cold: Arc<dyn ObjectStore>,
    registry: Arc<dyn MetadataRegistry>,
    config: EngineConfig,
    hot_mode: HotStorageMode,
}

impl EngineRegistry {
    pub fn new(
        cold: Arc<dyn ObjectStore>,
        registry: Arc<dyn MetadataRegistry>,
        config: EngineConfig,
        hot_mode: HotStorageMode,
    ) -> Self {
        Self {
            actors: DashMap::new(),
            cold,
            registry,
            config,
            hot_mode,
        }
    }

    pub fn handle_for(&self, path: &StreamPath) -> Result<EngineHandle, ApiError> {
        if let Some(tx) = self.actors.get(path) {
            if !tx.is_closed() {
                return Ok(EngineHandle { tx: tx.clone() });
            }
        }

        let hot = open_hot_store(&self.hot_mode, path)?;
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = StreamActor::new(
            path.project().to_string(),
            path.stream().to_string(),
            hot,
            self.cold.clone(),
            self.registry.clone(),
            self.config.clone(),
        );
        info!(path = %path, "spawning stream actor");
        tokio::spawn(actor.run(rx));
        self.actors.insert(path.clone(), tx.clone());
        Ok(EngineHandle { tx })
    }

    /// Drop the registry's reference to a (presumably now-deleted) stream's
    /// actor so a future request re-creates it from scratch.
    pub fn forget(&self, path: &StreamPath) {
        self.actors.remove(path);
    }

    pub fn live_actor_count(&self) -> usize {
        self.actors.len()
    }
}
