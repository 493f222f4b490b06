//! Generic LRU cache bounded by entry count, estimated memory, and TTL.
//!
//! Every operation, `get` included, runs under one mutex: a hit reorders the
//! recency list and an expired entry is removed on access, so reads mutate
//! too. Expiry is lazy; nothing sweeps the cache in the background.
//!
//! Invariants after every `put`:
//! - `len() <= max_entries`
//! - estimated memory `< max_memory_bytes`

use lru::LruCache;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use recall_core::{Error, Result};

use crate::footprint::MemoryFootprint;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    size_bytes: usize,
}

struct Inner<V> {
    entries: LruCache<String, CacheEntry<V>>,
    memory_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    rejected: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub memory_usage_mb: f64,
    pub max_memory_mb: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub rejected: u64,
    pub hit_rate: f64,
    pub ttl_seconds: u64,
}

pub struct BoundedCache<V> {
    inner: Mutex<Inner<V>>,
    max_entries: usize,
    max_memory_bytes: usize,
    ttl: Duration,
}

impl<V> BoundedCache<V>
where
    V: Clone + MemoryFootprint,
{
    pub fn new(max_entries: usize, max_memory_bytes: usize, ttl: Duration) -> Result<Self> {
        if max_entries == 0 {
            return Err(Error::InvalidConfig("cache max_entries must be positive".into()));
        }
        if max_memory_bytes == 0 {
            return Err(Error::InvalidConfig("cache max_memory_bytes must be positive".into()));
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                memory_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                rejected: 0,
            }),
            max_entries,
            max_memory_bytes,
            ttl,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let Some(expired) = inner.entries.peek(key).map(|entry| entry.inserted_at.elapsed() > self.ttl) else {
            inner.misses += 1;
            return None;
        };
        if expired {
            if let Some(entry) = inner.entries.pop(key) {
                inner.memory_bytes -= entry.size_bytes;
            }
            inner.misses += 1;
            debug!(key, "cache entry expired");
            return None;
        }
        inner.hits += 1;
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert `value`, evicting least-recently-used entries until both bounds
    /// hold. Returns `false` when the value alone cannot fit the memory bound;
    /// the cache is left untouched apart from dropping any previous value for
    /// `key`.
    pub fn put(&self, key: impl Into<String>, value: V) -> bool {
        let key = key.into();
        let size_bytes = key.len() + value.footprint() + std::mem::size_of::<CacheEntry<V>>();
        let mut inner = self.lock();

        if let Some(previous) = inner.entries.pop(&key) {
            inner.memory_bytes -= previous.size_bytes;
        }

        if size_bytes >= self.max_memory_bytes {
            inner.rejected += 1;
            warn!(key = %key, size_bytes, max_memory_bytes = self.max_memory_bytes, "cache entry larger than memory budget, not cached");
            return false;
        }

        while inner.entries.len() >= self.max_entries {
            Self::evict_lru(&mut inner);
        }
        while inner.memory_bytes + size_bytes >= self.max_memory_bytes && !inner.entries.is_empty() {
            Self::evict_lru(&mut inner);
        }

        inner.memory_bytes += size_bytes;
        inner.entries.push(key, CacheEntry { value, inserted_at: Instant::now(), size_bytes });
        true
    }

    fn evict_lru(inner: &mut Inner<V>) {
        if let Some((key, entry)) = inner.entries.pop_lru() {
            inner.memory_bytes -= entry.size_bytes;
            inner.evictions += 1;
            debug!(key = %key, size_bytes = entry.size_bytes, "evicted least-recently-used cache entry");
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.lock();
        match inner.entries.pop(key) {
            Some(entry) => {
                inner.memory_bytes -= entry.size_bytes;
                true
            }
            None => false,
        }
    }

    /// Drop every entry. Hit/miss/eviction counters are kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.memory_bytes = 0;
    }

    pub fn len(&self) -> usize { self.lock().entries.len() }

    pub fn is_empty(&self) -> bool { self.lock().entries.is_empty() }

    pub fn memory_bytes(&self) -> usize { self.lock().memory_bytes }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let requests = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_entries,
            memory_usage_mb: inner.memory_bytes as f64 / BYTES_PER_MB,
            max_memory_mb: self.max_memory_bytes as f64 / BYTES_PER_MB,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            rejected: inner.rejected,
            hit_rate: if requests == 0 { 0.0 } else { inner.hits as f64 / requests as f64 },
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}
