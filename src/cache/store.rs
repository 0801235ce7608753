//! Byte-bounded LRU + TTL response cache.
//!
//! # Responsibilities
//! - Serve GET response bodies by request path
//! - Expire entries lazily on lookup and proactively via `sweep_expired`
//! - Evict least recently used entries while over the byte budget
//!
//! # Design Decisions
//! - One mutex guards the index and the recency list together; a hit is a
//!   write because it promotes the node
//! - Entry cost is `key + value + fixed overhead`; `used_bytes` is adjusted on
//!   every insert/update/evict/expire and never recomputed
//! - Values are copied in on store and copied out on hit

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::cache::lru::{NodeId, RecencyList};
use crate::config::CacheConfig;
use crate::observability::metrics;

/// Default bookkeeping cost charged to every entry.
pub const DEFAULT_ENTRY_OVERHEAD: usize = 64;

#[derive(Debug)]
struct Entry {
    key: String,
    value: Vec<u8>,
    size: usize,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    index: HashMap<String, NodeId>,
    list: RecencyList<Entry>,
    used_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl CacheState {
    /// Unlink an entry from both structures and release its bytes.
    fn unlink(&mut self, id: NodeId) -> Option<Entry> {
        let entry = self.list.remove(id)?;
        self.index.remove(&entry.key);
        self.used_bytes -= entry.size;
        Some(entry)
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub used_bytes: usize,
    pub max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// LRU + TTL cache of response bodies with a total byte budget.
#[derive(Debug)]
pub struct ResponseCache {
    state: Mutex<CacheState>,
    ttl: Duration,
    max_bytes: usize,
    entry_overhead: usize,
}

impl ResponseCache {
    /// Create a cache with the default per-entry overhead.
    pub fn new(ttl: Duration, max_bytes: usize) -> Self {
        Self::with_overhead(ttl, max_bytes, DEFAULT_ENTRY_OVERHEAD)
    }

    pub fn with_overhead(ttl: Duration, max_bytes: usize, entry_overhead: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            ttl,
            max_bytes,
            entry_overhead,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_overhead(config.ttl(), config.max_bytes, config.entry_overhead_bytes)
    }

    /// Cost charged against the budget for storing `value` under `key`.
    pub fn entry_size(&self, key: &str, value: &[u8]) -> usize {
        key.len() + value.len() + self.entry_overhead
    }

    /// Look up `key`, promoting it to most recently used on a hit.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut state = self.lock();
        let Some(&id) = state.index.get(key) else {
            state.misses += 1;
            metrics::record_cache_lookup(false);
            tracing::debug!(key = %key, reason = "not_found", "Cache miss");
            return None;
        };

        let expired = state
            .list
            .get(id)
            .map_or(true, |entry| Instant::now() >= entry.expires_at);
        if expired {
            state.unlink(id);
            state.misses += 1;
            state.expirations += 1;
            metrics::record_cache_lookup(false);
            metrics::record_cache_usage(state.used_bytes, state.index.len());
            tracing::debug!(key = %key, reason = "expired", "Cache miss");
            return None;
        }

        state.list.move_to_front(id);
        state.hits += 1;
        metrics::record_cache_lookup(true);
        let value = state.list.get(id).map(|entry| entry.value.clone());
        tracing::debug!(key = %key, "Cache hit");
        value
    }

    /// Insert or overwrite `key`, resetting its TTL, then evict from the
    /// least recently used end until back under budget.
    pub fn store(&self, key: &str, value: &[u8]) {
        let size = self.entry_size(key, value);
        let expires_at = Instant::now() + self.ttl;
        let mut state = self.lock();

        match state.index.get(key).copied() {
            Some(id) => {
                let old_size = match state.list.get_mut(id) {
                    Some(entry) => {
                        let old = entry.size;
                        entry.value = value.to_vec();
                        entry.size = size;
                        entry.expires_at = expires_at;
                        old
                    }
                    None => 0,
                };
                state.used_bytes = state.used_bytes - old_size + size;
                state.list.move_to_front(id);
                tracing::debug!(key = %key, old_size, new_size = size, "Cache update");
            }
            None => {
                let id = state.list.push_front(Entry {
                    key: key.to_string(),
                    value: value.to_vec(),
                    size,
                    expires_at,
                });
                state.index.insert(key.to_string(), id);
                state.used_bytes += size;
                tracing::debug!(key = %key, size, "Cache store");
            }
        }

        let mut evicted = 0u64;
        while state.used_bytes > self.max_bytes {
            let Some(tail) = state.list.back() else { break };
            if let Some(entry) = state.unlink(tail) {
                tracing::debug!(
                    key = %entry.key,
                    size = entry.size,
                    used_bytes = state.used_bytes,
                    max_bytes = self.max_bytes,
                    "Evicted LRU entry"
                );
                evicted += 1;
            }
        }
        state.evictions += evicted;
        if evicted > 0 {
            tracing::info!(
                evicted_entries = evicted,
                used_bytes = state.used_bytes,
                max_bytes = self.max_bytes,
                "Cache eviction completed"
            );
        }
        metrics::record_cache_usage(state.used_bytes, state.index.len());
    }

    /// Remove `key` if present.
    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.lock();
        let Some(&id) = state.index.get(key) else {
            return false;
        };
        state.unlink(id);
        metrics::record_cache_usage(state.used_bytes, state.index.len());
        true
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.index.clear();
        state.list = RecencyList::new();
        state.used_bytes = 0;
        metrics::record_cache_usage(0, 0);
    }

    /// Remove every expired entry regardless of recency, walking from the
    /// least recently used end. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let mut removed = 0;

        let mut cursor = state.list.back();
        while let Some(id) = cursor {
            cursor = state.list.prev(id);
            let expired = state.list.get(id).is_some_and(|entry| now >= entry.expires_at);
            if expired {
                state.unlink(id);
                removed += 1;
            }
        }

        state.expirations += removed as u64;
        if removed > 0 {
            tracing::info!(
                expired_entries = removed,
                remaining_entries = state.index.len(),
                used_bytes = state.used_bytes,
                "Cache sweep completed"
            );
            metrics::record_cache_usage(state.used_bytes, state.index.len());
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.index.len(),
            used_bytes: state.used_bytes,
            max_bytes: self.max_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> usize {
        self.lock().used_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sum of live entry sizes, recomputed by walking the list.
    #[cfg(test)]
    fn audit_bytes(&self) -> usize {
        let state = self.lock();
        assert_eq!(state.index.len(), state.list.len());
        state.list.iter().map(|e| e.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_get_returns_stored_copy() {
        let cache = ResponseCache::new(HOUR, 1024);
        let mut body = b"hello".to_vec();
        cache.store("/a", &body);
        body[0] = b'X';

        let mut hit = cache.get("/a").unwrap();
        assert_eq!(hit, b"hello");
        hit[0] = b'Y';
        assert_eq!(cache.get("/a").unwrap(), b"hello");
    }

    #[test]
    fn test_miss_on_unknown_key() {
        let cache = ResponseCache::new(HOUR, 1024);
        assert_eq!(cache.get("/missing"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_lru_eviction_respects_access_order() {
        // Each entry costs 1 + 100 + 20 = 121 bytes; the budget holds two.
        let cache = ResponseCache::with_overhead(HOUR, 250, 20);
        let payload = vec![0u8; 100];

        cache.store("A", &payload);
        cache.store("B", &payload);
        assert!(cache.get("A").is_some());
        cache.store("C", &payload);

        assert!(cache.get("B").is_none());
        assert!(cache.get("A").is_some());
        assert!(cache.get("C").is_some());
        assert_eq!(cache.used_bytes(), 242);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_adjusts_bytes() {
        let cache = ResponseCache::with_overhead(HOUR, 1024, 10);
        cache.store("k", &[0u8; 100]);
        assert_eq!(cache.used_bytes(), 111);
        cache.store("k", &[0u8; 10]);
        assert_eq!(cache.used_bytes(), 21);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.audit_bytes(), 21);
    }

    #[test]
    fn test_oversized_entry_is_not_retained() {
        let cache = ResponseCache::with_overhead(HOUR, 50, 0);
        cache.store("small", &[0u8; 10]);
        cache.store("huge", &[0u8; 100]);
        assert!(cache.is_empty());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn test_accounting_matches_entries() {
        let cache = ResponseCache::with_overhead(HOUR, 600, 16);
        for round in 0..50usize {
            let key = format!("/k{}", round % 13);
            cache.store(&key, &vec![1u8; (round * 37) % 120]);
            if round % 3 == 0 {
                cache.get(&format!("/k{}", round % 7));
            }
            if round % 11 == 0 {
                cache.remove(&format!("/k{}", round % 5));
            }
            assert!(cache.used_bytes() <= cache.max_bytes());
            assert_eq!(cache.used_bytes(), cache.audit_bytes());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_get_is_miss_and_removes() {
        let cache = ResponseCache::new(Duration::from_secs(30), 1024 * 1024);
        cache.store("/a", b"body");

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.get("/a").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("/a").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.used_bytes(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_resets_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(10), 1024);
        cache.store("/a", b"v1");
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.store("/a", b"v2");
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("/a").unwrap(), b"v2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_cold_and_hot_expired_entries() {
        let cache = ResponseCache::new(Duration::from_secs(10), 1024 * 1024);
        cache.store("/old-1", b"x");
        cache.store("/old-2", b"x");
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.store("/fresh", b"x");
        // Promote an entry that will still expire.
        cache.get("/old-1");

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.sweep_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("/fresh").is_some());
        assert_eq!(cache.used_bytes(), cache.audit_bytes());
    }
}
