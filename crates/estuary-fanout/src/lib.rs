pub mod breaker;
pub mod estuary_index;
pub mod lifecycle;
pub mod publish;
pub mod queue;
pub mod subscriber_registry;

pub use breaker::{BreakerState, CircuitBreaker};
pub use estuary_index::EstuaryIndex;
pub use lifecycle::EstuaryLifecycleManager;
pub use publish::{FanoutEngine, PublishResult, FANOUT_BATCH_SIZE, MAX_INLINE_FANOUT};
pub use queue::{FanoutQueue, InMemoryQueue, QueuedBatch};
pub use subscriber_registry::SubscriberRegistry;
