//! Per-URL response cache (spec §4.8).
//!
//! Honors three rules: `Cache-Control: no-store` responses are never
//! stored; at-tail plain `GET`s are never cached (data changes as appends
//! arrive, breaking read-after-write) unless the request was an explicit
//! long-poll, whose rotating cursor makes the response content-addressable;
//! and a non-public stream's response is only cached when the URL carries
//! the stream's reader key.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub etag: String,
}

struct Entry {
    response: Arc<CachedResponse>,
    stored_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

/// Whether a response for this request is eligible to be cached at all,
/// independent of what the response turned out to contain.
#[derive(Debug, Clone, Copy)]
pub struct CacheEligibility {
    /// The GET is an at-tail catch-up read with no rotating cursor to make
    /// it content-addressable (a plain `GET`, not `live=long-poll`).
    pub is_uncacheable_tail_read: bool,
    /// The stream is non-public and the URL is missing its reader key.
    pub is_keyless_private_url: bool,
}

impl CacheEligibility {
    pub fn allows_caching(&self) -> bool {
        !self.is_uncacheable_tail_read && !self.is_keyless_private_url
    }
}

pub struct EdgeCache {
    entries: DashMap<String, Entry>,
}

impl EdgeCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, url: &str) -> Option<Arc<CachedResponse>> {
        let expired = match self.entries.get(url) {
            Some(entry) if !entry.is_expired() => return Some(entry.response.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(url);
        }
        None
    }

    /// Store a response if `Cache-Control: no-store` wasn't set and the
    /// request was eligible per §4.8's rules.
    pub fn put(&self, url: &str, response: CachedResponse, ttl: Duration, eligibility: CacheEligibility) {
        if has_no_store(&response.headers) || !eligibility.allows_caching() {
            return;
        }
        self.entries.insert(
            url.to_string(),
            Entry {
                response: Arc::new(response),
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn invalidate(&self, url: &str) {
        self.entries.remove(url);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EdgeCache {
    fn default() -> Self {
        Self::new()
    }
}

fn has_no_store(headers: &[(String, String)]) -> bool {
    headers.iter().any(|(k, v)| {
        k.eq_ignore_ascii_case("cache-control") && v.to_ascii_lowercase().contains("no-store")
    })
}

/// Whether `If-None-Match` matches the cached entry's ETag (a 304 case).
pub fn etag_matches(if_none_match: Option<&str>, etag: &str) -> bool {
    match if_none_match {
        Some(value) => value.split(',').map(str::trim).any(|tag| tag == etag || tag == "*"),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(headers: Vec<(&str, &str)>) -> CachedResponse {
        CachedResponse {
            status: 200,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Bytes::from_static(b"hello"),
            etag: "\"abc\"".to_string(),
        }
    }

    fn eligible() -> CacheEligibility {
        CacheEligibility {
            is_uncacheable_tail_read: false,
            is_keyless_private_url: false,
        }
    }

    #[test]
    fn stores_and_returns_a_cacheable_response() {
        let cache = EdgeCache::new();
        cache.put("/s", response(vec![]), Duration::from_secs(60), eligible());
        assert!(cache.get("/s").is_some());
    }

    #[test]
    fn refuses_to_store_no_store_responses() {
        let cache = EdgeCache::new();
        cache.put(
            "/s",
            response(vec![("Cache-Control", "no-store")]),
            Duration::from_secs(60),
            eligible(),
        );
        assert!(cache.get("/s").is_none());
    }

    #[test]
    fn refuses_to_store_at_tail_reads() {
        let cache = EdgeCache::new();
        let ineligible = CacheEligibility {
            is_uncacheable_tail_read: true,
            is_keyless_private_url: false,
        };
        cache.put("/s", response(vec![]), Duration::from_secs(60), ineligible);
        assert!(cache.get("/s").is_none());
    }

    #[test]
    fn refuses_to_store_keyless_private_urls() {
        let cache = EdgeCache::new();
        let ineligible = CacheEligibility {
            is_uncacheable_tail_read: false,
            is_keyless_private_url: true,
        };
        cache.put("/s", response(vec![]), Duration::from_secs(60), ineligible);
        assert!(cache.get("/s").is_none());
    }

    #[test]
    fn expired_entries_are_evicted_on_read() {
        let cache = EdgeCache::new();
        cache.put("/s", response(vec![]), Duration::from_millis(1), eligible());
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("/s").is_none());
    }

    #[test]
    fn etag_matching_handles_wildcard_and_list() {
        assert!(etag_matches(Some("\"abc\""), "\"abc\""));
        assert!(etag_matches(Some("\"x\", \"abc\""), "\"abc\""));
        assert!(etag_matches(Some("*"), "\"abc\""));
        assert!(!etag_matches(Some("\"x\""), "\"abc\""));
        assert!(!etag_matches(None, "\"abc\""));
    }
}
