//! Hot storage (per-stream embedded SQLite), cold storage (content
//! addressed object store), and the shared metadata registry.

pub mod cold;
pub mod hot;
pub mod registry;

pub use cold::{segment_key, ColdError, FsObjectStore, InMemoryObjectStore, ObjectStore};
pub use hot::{HotStore, NewOp, NewSegment, NewStream, OpRow, ProducerState, SegmentRow, StoreError, StreamMeta};
pub use registry::{
    delete_with_retries, project_key, retry_linear, stream_key, InMemoryRegistry, MetadataRegistry,
    ProjectConfig, StreamMetaEntry,
};
