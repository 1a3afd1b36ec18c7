//! Binary entrypoint: parses CLI/env configuration, wires the engine,
//! fan-out, and edge layers together, and serves HTTP until shutdown.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use estuary_edge::{EdgeCache, InFlightCoalescer};
use estuary_engine::{EngineConfig, EngineRegistry, HotStorageMode};
use estuary_fanout::{EstuaryIndex, EstuaryLifecycleManager, FanoutEngine, InMemoryQueue, SubscriberRegistry};
use estuary_server::{start_server, AppState, ServerOptions};
use estuary_storage::{FsObjectStore, InMemoryObjectStore, InMemoryRegistry};
use tracing::{error, info};

/// Estuary — durable event-streaming service with publish/subscribe fan-out.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Opts {
    /// Path to a `.env` file to load before reading the rest of these options.
    #[arg(long = "env-file", default_value = "./.env")]
    env_file: PathBuf,

    /// Host to bind the HTTP server to.
    #[arg(long, env = "ESTUARY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the HTTP server to.
    #[arg(long, env = "ESTUARY_PORT", default_value_t = 4437)]
    port: u16,

    /// Directory for file-backed hot/cold storage. Omit to run fully
    /// in-memory (data is lost on restart).
    #[arg(long = "data-dir", env = "ESTUARY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Default long-poll wait, in milliseconds, when the client doesn't ask
    /// for a specific timeout.
    #[arg(long, env = "ESTUARY_LONG_POLL_DEFAULT_MS", default_value_t = 20_000)]
    long_poll_default_ms: u64,

    /// Upper bound on a client-requested long-poll wait, in milliseconds.
    #[arg(long, env = "ESTUARY_LONG_POLL_MAX_MS", default_value_t = 55_000)]
    long_poll_max_ms: u64,

    /// Sweep interval for expired estuaries, in seconds.
    #[arg(long, env = "ESTUARY_LIFECYCLE_SWEEP_SECS", default_value_t = 30)]
    lifecycle_sweep_secs: u64,
}

fn load_env_file(path: &PathBuf) {
    match dotenvy::from_path(path) {
        Ok(()) => info!(path = %path.display(), "loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => error!(path = %path.display(), error = %e, "failed to load environment file"),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    load_env_file(&opts.env_file);
    init_tracing();

    let cold: Arc<dyn estuary_storage::ObjectStore> = match &opts.data_dir {
        Some(dir) => Arc::new(FsObjectStore::new(dir.join("cold"))),
        None => Arc::new(InMemoryObjectStore::new()),
    };
    let hot_mode = match &opts.data_dir {
        Some(dir) => HotStorageMode::Dir(dir.join("hot")),
        None => HotStorageMode::InMemory,
    };
    let metadata = Arc::new(InMemoryRegistry::new());

    let engine = Arc::new(EngineRegistry::new(cold, metadata.clone(), EngineConfig::default(), hot_mode));
    let subscribers = Arc::new(SubscriberRegistry::new(metadata.clone()));
    let estuary_index = Arc::new(EstuaryIndex::new(metadata));
    let fanout = Arc::new(FanoutEngine::new(
        engine.clone(),
        subscribers.clone(),
        Arc::new(InMemoryQueue::new()),
    ));
    let lifecycle = Arc::new(EstuaryLifecycleManager::new(
        engine.clone(),
        subscribers.clone(),
        estuary_index.clone(),
    ));

    spawn_lifecycle_sweeper(lifecycle.clone(), opts.lifecycle_sweep_secs);

    let state = AppState {
        engine,
        subscribers,
        estuary_index,
        fanout,
        lifecycle,
        edge_cache: Arc::new(EdgeCache::new()),
        coalescer: Arc::new(InFlightCoalescer::new()),
        options: ServerOptions {
            host: opts.host,
            port: opts.port,
            long_poll_default_ms: opts.long_poll_default_ms,
            long_poll_max_ms: opts.long_poll_max_ms,
        },
    };

    if let Err(e) = run(state).await {
        error!(error = %e, "server exited with an error");
        process::exit(1);
    }
}

async fn run(state: AppState) -> std::io::Result<()> {
    tokio::select! {
        result = start_server(state) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            Ok(())
        }
    }
}

fn spawn_lifecycle_sweeper(lifecycle: Arc<EstuaryLifecycleManager>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let now_ms = chrono::Utc::now().timestamp_millis();
            lifecycle.sweep(now_ms).await;
        }
    });
}
