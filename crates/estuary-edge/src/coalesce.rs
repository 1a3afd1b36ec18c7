//! In-flight request coalescing (spec §4.8): a process-wide `url →
//! promise<response>` map so concurrent cache-miss `GET`s to the same URL
//! invoke the engine at most once.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::warn;

use crate::cache::CachedResponse;

/// How long a resolved, cached entry lingers in the map so requests landing
/// just after resolution still find it, covering the gap before the async
/// cache write completes.
pub const LINGER_MS: u64 = 200;
/// Hard cap on concurrently in-flight URLs.
pub const MAX_IN_FLIGHT: usize = 100_000;

pub type SharedResult = Result<Arc<CachedResponse>, String>;

enum Slot {
    Pending(broadcast::Sender<SharedResult>),
    Resolved(SharedResult),
}

/// Either the first caller for a URL (must drive the fetch and call
/// [`InFlightCoalescer::resolve`]) or a later one that should await the
/// first caller's result.
pub enum Lease {
    Leader,
    Follower(broadcast::Receiver<SharedResult>),
}

pub struct InFlightCoalescer {
    slots: DashMap<String, Slot>,
}

impl InFlightCoalescer {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Register intent to fetch `url`. The first caller becomes the leader
    /// and must call [`resolve`]; later callers get a `Follower` receiver.
    /// Returns `None` if the map is at capacity and this can't be
    /// coalesced at all (caller should just fetch uncoalesced).
    pub fn acquire(&self, url: &str) -> Option<Lease> {
        if let Some(slot) = self.slots.get(url) {
            return match &*slot {
                Slot::Pending(tx) => Some(Lease::Follower(tx.subscribe())),
                Slot::Resolved(result) => {
                    let (tx, rx) = broadcast::channel(1);
                    let _ = tx.send(result.clone());
                    Some(Lease::Follower(rx))
                }
            };
        }

        if self.slots.len() >= MAX_IN_FLIGHT {
            warn!(url, "in-flight coalescing map at capacity, bypassing");
            return None;
        }

        let (tx, _rx) = broadcast::channel(16);
        self.slots.insert(url.to_string(), Slot::Pending(tx));
        Some(Lease::Leader)
    }

    /// The leader reports the fetch result. Followers waiting on the
    /// broadcast channel wake immediately. If the response was cached, the
    /// slot is kept around (as `Resolved`) so requests arriving just after
    /// still coalesce; the caller is responsible for scheduling its
    /// eviction after `LINGER_MS` via [`Self::evict_after_linger`]. If the
    /// response wasn't cached, or the fetch failed, the slot is dropped
    /// immediately.
    pub fn resolve(&self, url: &str, result: SharedResult, was_cached: bool) {
        if let Some((_, Slot::Pending(tx))) = self.slots.remove(url) {
            let _ = tx.send(result.clone());
        }

        if was_cached && result.is_ok() {
            self.slots.insert(url.to_string(), Slot::Resolved(result));
        }
    }

    /// Spawn the delayed cleanup for a `Resolved` slot left behind by
    /// [`resolve`]. Takes `Arc<Self>` since the cleanup outlives the
    /// request that triggered it.
    pub fn evict_after_linger(self: &Arc<Self>, url: String) {
        let coalescer = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(LINGER_MS)).await;
            coalescer.slots.remove(&url);
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for InFlightCoalescer {
    fn default() -> Self {
        Self::new()
    }
}
