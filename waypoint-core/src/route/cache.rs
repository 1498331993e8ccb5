//! Bounded, approximate-LRU cache for `(method, path) -> matched route`
//! lookups (§4.1, §9). Sharded like a `DashMap` to keep eviction cheap under
//! concurrent access: each shard independently evicts its oldest entries
//! once it grows past its share of the total capacity, rather than
//! maintaining one global, lock-free-but-expensive LRU list.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Default total capacity across all shards (§9 design note).
pub const DEFAULT_CAPACITY: usize = 20_000;

const SHARD_COUNT: usize = 16;

struct Entry<V> {
    value: V,
    last_used: u64,
}

/// A sharded, bounded cache keyed by `String`. Eviction is approximate: when
/// a shard exceeds its per-shard budget, the least-recently-used half of
/// that shard is dropped in one pass rather than maintaining an exact
/// ordering, trading perfect LRU for lock-free reads.
pub struct MatchCache<V> {
    shards: Vec<DashMap<String, Entry<V>>>,
    per_shard_capacity: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> MatchCache<V> {
    pub fn new(capacity: usize) -> Self {
        let per_shard_capacity = (capacity / SHARD_COUNT).max(1);
        Self {
            shards: (0..SHARD_COUNT).map(|_| DashMap::new()).collect(),
            per_shard_capacity,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, key: &str) -> &DashMap<String, Entry<V>> {
        let hash = key.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        &self.shards[(hash as usize) % self.shards.len()]
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let shard = self.shard_for(key);
        if let Some(mut entry) = shard.get_mut(key) {
            entry.last_used = self.clock.fetch_add(1, Ordering::Relaxed);
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.value.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn insert(&self, key: String, value: V) {
        let shard = self.shard_for(&key);
        let last_used = self.clock.fetch_add(1, Ordering::Relaxed);
        shard.insert(key, Entry { value, last_used });
        if shard.len() > self.per_shard_capacity {
            self.evict_half(shard);
        }
    }

    fn evict_half(&self, shard: &DashMap<String, Entry<V>>) {
        let mut ages: Vec<(String, u64)> = shard.iter().map(|e| (e.key().clone(), e.value().last_used)).collect();
        ages.sort_by_key(|(_, last_used)| *last_used);
        let evict_count = ages.len() / 2;
        for (key, _) in ages.into_iter().take(evict_count) {
            shard.remove(&key);
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.shard_for(key).remove(key);
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats { hits: self.hits.load(Ordering::Relaxed), misses: self.misses.load(Ordering::Relaxed), size: self.len() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

/// Composite key for a cache lookup: method plus normalized path.
pub fn cache_key(method: &str, path: &str) -> String {
    let mut key = String::with_capacity(method.len() + 1 + path.len());
    key.push_str(method);
    key.push(' ');
    key.push_str(path);
    key
}
