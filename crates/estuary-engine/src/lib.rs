//! The stream engine: a single-writer-per-stream actor over hot/cold
//! storage, rotation, and live delivery (spec §4.5, §9).

pub mod actor;
pub mod config;
pub mod framing;
pub mod handle;
pub mod live;
pub mod producer_check;
pub mod rotation;
pub mod types;

pub use config::EngineConfig;
pub use framing::format_messages;
pub use handle::{EngineHandle, EngineRegistry, HotStorageMode};
pub use live::{ControlFrame, LiveFrame};
pub use types::{
    AppendOutcome, AppendRequest, CreateOutcome, CreateRequest, HeadOutcome, ReadOutcome,
    ReadRequest,
};
