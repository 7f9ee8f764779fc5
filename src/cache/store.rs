//! TTL + LFU-tail Cache Store
//!
//! Key→value store where every entry carries its own expiry and a hit
//! counter. Capacity is enforced at insertion time:
//!
//! ```text
//!   set(k) with k absent and len >= max_size
//!        │
//!        ▼
//!   ┌─────────────────────┐   still full   ┌──────────────────────────────┐
//!   │ purge expired (≤now)│ ─────────────▶ │ drop lowest hit_count entries│
//!   └─────────────────────┘                │ (oldest insertion on ties)   │
//!                                          │ n = max(1, len-max, len/10)  │
//!                                          └──────────────────────────────┘
//! ```
//!
//! All state sits behind one mutex, so per-key access is linearizable and
//! eviction is exclusive with concurrent reads and writes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use super::entry::{CacheEntry, CacheStats};
use crate::config::CacheConfig;
use crate::error::{Error, Result};

struct StoreInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// Process-wide query-result cache.
pub struct CacheStore<V> {
    inner: Mutex<StoreInner<V>>,
    default_ttl: Duration,
    max_size: usize,
}

impl<V: Clone> CacheStore<V> {
    /// Create a store from validated configuration.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        Self::with_limits(config.max_size, config.default_ttl()?)
    }

    /// Create a store with explicit limits.
    pub fn with_limits(max_size: usize, default_ttl: Duration) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::Configuration(
                "cache max_size must be greater than zero".into(),
            ));
        }
        if default_ttl.is_zero() {
            return Err(Error::Configuration(
                "cache default_ttl must be greater than zero".into(),
            ));
        }

        Ok(Self {
            inner: Mutex::new(StoreInner {
                entries: HashMap::with_capacity(max_size.min(4096)),
                next_seq: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            default_ttl,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry, counting a hit on it.
    ///
    /// Expired entries are removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.record_hit();
                inner.hits += 1;
                return Some(entry.value().clone());
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.expirations += 1;
            }
            None => {}
        }

        inner.misses += 1;
        None
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert or overwrite `key`, resetting its hit counter.
    ///
    /// A zero TTL drops any existing entry and stores nothing.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if ttl.is_zero() {
            inner.entries.remove(&key);
            return;
        }

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_size {
            self.make_room(&mut inner, now);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(key, CacheEntry::new(value, ttl, now, seq));
    }

    /// Remove a single key. No-op if absent.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Remove every key containing `pattern` as a literal substring.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.contains(pattern));
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(pattern = %pattern, removed, "Invalidated cache entries");
        }
        removed
    }

    /// Remove every key starting with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(prefix = %prefix, removed, "Invalidated cache family");
        }
        removed
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Hits on `key` since it was last set (0 if absent or expired).
    pub fn get_hit_rate(&self, key: &str) -> u64 {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.hit_count())
            .unwrap_or(0)
    }

    /// Eagerly drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        Self::purge_locked(&mut inner, now)
    }

    /// True if `key` holds a live entry. Does not count as a hit.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .map_or(false, |entry| !entry.is_expired(now))
    }

    /// Stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }

    fn purge_locked(inner: &mut StoreInner<V>, now: Instant) -> usize {
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        inner.expirations += removed as u64;
        removed
    }

    fn make_room(&self, inner: &mut StoreInner<V>, now: Instant) {
        let expired = Self::purge_locked(inner, now);
        let len = inner.entries.len();
        if len < self.max_size {
            debug!(expired, "Cache eviction satisfied by expiry sweep");
            return;
        }

        let count = 1.max(len - self.max_size).max(len / 10);

        let mut candidates: Vec<(u64, u64, String)> = inner
            .entries
            .iter()
            .map(|(key, entry)| (entry.hit_count(), entry.seq(), key.clone()))
            .collect();
        candidates.sort_unstable();

        for (_, _, key) in candidates.into_iter().take(count) {
            inner.entries.remove(&key);
        }
        inner.evictions += count as u64;

        debug!(expired, evicted = count, remaining = inner.entries.len(), "Cache eviction");
    }
}

// =============================================================================
// Query Cache Port
// =============================================================================

/// Byte-level cache used by the caching repository decorator.
///
/// Every call may fail; callers treat a failure as a miss and carry on
/// without the cache.
pub trait QueryCache: Send + Sync {
    fn lookup(&self, key: &str) -> Result<Option<Bytes>>;

    fn store(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    fn evict_matching(&self, pattern: &str) -> Result<usize>;

    /// Evict keys starting with `prefix`.
    fn evict_prefix(&self, prefix: &str) -> Result<usize>;
}

impl QueryCache for CacheStore<Bytes> {
    fn lookup(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.get(key))
    }

    fn store(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.set_with_ttl(key, value, ttl);
        Ok(())
    }

    fn evict_matching(&self, pattern: &str) -> Result<usize> {
        Ok(self.invalidate_pattern(pattern))
    }

    fn evict_prefix(&self, prefix: &str) -> Result<usize> {
        Ok(self.invalidate_prefix(prefix))
    }
}

/// Cache that never holds anything, used when caching is turned off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCache;

impl QueryCache for DisabledCache {
    fn lookup(&self, _key: &str) -> Result<Option<Bytes>> {
        Ok(None)
    }

    fn store(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    fn evict_matching(&self, _pattern: &str) -> Result<usize> {
        Ok(0)
    }

    fn evict_prefix(&self, _prefix: &str) -> Result<usize> {
        Ok(0)
    }
}

// =============================================================================
// Tests
// =============================================================================
