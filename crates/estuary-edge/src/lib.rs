pub mod bridge;
pub mod cache;
pub mod coalesce;

pub use bridge::{to_sse_event, SseEvent};
pub use cache::{etag_matches, CacheEligibility, CachedResponse, EdgeCache};
pub use coalesce::{InFlightCoalescer, Lease, SharedResult, LINGER_MS, MAX_IN_FLIGHT};
