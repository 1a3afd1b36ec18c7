use std::sync::Arc;

use estuary_edge::{EdgeCache, InFlightCoalescer};
use estuary_engine::EngineRegistry;
use estuary_fanout::{EstuaryIndex, EstuaryLifecycleManager, FanoutEngine, SubscriberRegistry};

/// Options controlling host/port and read timing, mirroring the teacher's
/// own `ServerOptions` shape.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub long_poll_default_ms: u64,
    pub long_poll_max_ms: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4437,
            long_poll_default_ms: 20_000,
            long_poll_max_ms: 55_000,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<EngineRegistry>,
    pub subscribers: Arc<SubscriberRegistry>,
    pub estuary_index: Arc<EstuaryIndex>,
    pub fanout: Arc<FanoutEngine>,
    pub lifecycle: Arc<EstuaryLifecycleManager>,
    pub edge_cache: Arc<EdgeCache>,
    pub coalescer: Arc<InFlightCoalescer>,
    pub options: ServerOptions,
}
