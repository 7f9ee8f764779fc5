//! Cache Entry Types
//!
//! Per-key bookkeeping for the query-result cache and the aggregate
//! statistics it reports.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Upper bound applied to TTLs so expiry arithmetic cannot overflow.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 86_400);

/// A single cached value with its expiry and hit counter.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    hit_count: u64,
    /// Insertion sequence number, the eviction tie-break
    seq: u64,
}

impl<V> CacheEntry<V> {
    /// Create a new entry expiring `ttl` after `now`.
    pub fn new(value: V, ttl: Duration, now: Instant, seq: u64) -> Self {
        Self {
            value,
            expires_at: now + ttl.min(MAX_TTL),
            hit_count: 0,
            seq,
        }
    }

    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    #[inline]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    #[inline]
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Live iff `now < expires_at`.
    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Record a hit and return the new count
    #[inline]
    pub fn record_hit(&mut self) -> u64 {
        self.hit_count += 1;
        self.hit_count
    }

    /// Time left before expiry
    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Point-in-time view of cache activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Fraction of lookups served from cache.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fill level as a fraction of `max_size`.
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.entries as f64 / self.max_size as f64
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expiry_boundary() {
        let now = Instant::now();
        let entry = CacheEntry::new(1u32, Duration::from_millis(100), now, 0);

        assert!(!entry.is_expired(now));
        assert!(!entry.is_expired(now + Duration::from_millis(99)));
        assert!(entry.is_expired(now + Duration::from_millis(100)));
        assert_eq!(entry.remaining_ttl(now + Duration::from_millis(200)), Duration::ZERO);
    }

    #[test]
    fn test_entry_hits() {
        let mut entry = CacheEntry::new("v", Duration::from_secs(1), Instant::now(), 7);
        assert_eq!(entry.hit_count(), 0);
        assert_eq!(entry.record_hit(), 1);
        assert_eq!(entry.record_hit(), 2);
        assert_eq!(entry.seq(), 7);
        assert_eq!(*entry.value(), "v");
    }

    #[test]
    fn test_stats_ratios() {
        let stats = CacheStats {
            entries: 25,
            max_size: 100,
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert!((stats.utilization() - 0.25).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }
}
