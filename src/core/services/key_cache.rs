use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::errors::{KeyTrustError, Result};
use crate::core::models::key_metadata::KeyMetadata;

/// Source of "now" for expiry decisions. Swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Values the key manager memoizes.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    PublicKeyPem(String),
    Fingerprint(String),
    Metadata(Box<KeyMetadata>),
}

impl CachedValue {
    fn is_empty(&self) -> bool {
        match self {
            CachedValue::PublicKeyPem(s) | CachedValue::Fingerprint(s) => s.is_empty(),
            CachedValue::Metadata(m) => m.key_id.is_empty(),
        }
    }

    /// Rough heap footprint, for `CacheStats::total_size`.
    fn estimated_size(&self) -> usize {
        match self {
            CachedValue::PublicKeyPem(s) | CachedValue::Fingerprint(s) => s.len(),
            CachedValue::Metadata(m) => {
                std::mem::size_of::<KeyMetadata>()
                    + m.key_id.len()
                    + m.fingerprint.as_str().len()
                    + m.curve.as_ref().map_or(0, String::len)
            }
        }
    }

    /// Text payload, `None` for structured values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CachedValue::PublicKeyPem(s) | CachedValue::Fingerprint(s) => Some(s),
            CachedValue::Metadata(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    expires_at: Instant,
    last_accessed: Instant,
    /// Logical access order; breaks ties between equal `last_accessed`.
    access_seq: u64,
    access_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Live view of one entry, as returned by [`KeyCache::entries`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntryView {
    pub key: String,
    pub value: CachedValue,
    pub remaining_ttl: Duration,
    pub access_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups that hit, 0 when there were none.
    pub hit_rate: f64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub utilization: f64,
    pub expired_count: usize,
    /// Estimated bytes held by keys and values.
    pub total_size: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
    evictions: u64,
}

/// Bounded, TTL-aware cache with least-recently-accessed eviction.
///
/// Eviction scans all entries for the smallest access order. Caches
/// here hold a handful of keys, so the linear scan is fine.
pub struct KeyCache {
    entries: HashMap<String, CacheEntry>,
    max_size: usize,
    default_ttl: Duration,
    counters: Counters,
    next_seq: u64,
    clock: Arc<dyn Clock>,
}

impl KeyCache {
    pub fn new(max_size: usize, default_ttl: Duration) -> Result<Self> {
        Self::with_clock(max_size, default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(max_size: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        if max_size < 1 {
            return Err(KeyTrustError::InvalidArgument {
                detail: "cache max size must be at least 1".into(),
            });
        }
        Ok(Self {
            entries: HashMap::new(),
            max_size,
            default_ttl,
            counters: Counters::default(),
            next_seq: 0,
            clock,
        })
    }

    /// Insert with the default TTL.
    pub fn set(&mut self, key: &str, value: CachedValue) -> Result<()> {
        self.set_with_ttl(key, value, self.default_ttl)
    }

    pub fn set_with_ttl(&mut self, key: &str, value: CachedValue, ttl: Duration) -> Result<()> {
        if key.is_empty() {
            return Err(KeyTrustError::InvalidArgument {
                detail: "cache key must not be empty".into(),
            });
        }
        if value.is_empty() {
            return Err(KeyTrustError::InvalidArgument {
                detail: format!("cache value for '{key}' must not be empty"),
            });
        }

        if !self.entries.contains_key(key) && self.entries.len() >= self.max_size {
            self.evict_lru();
        }

        let now = self.clock.now();
        let seq = self.bump_seq();
        let access_count = self.entries.get(key).map_or(0, |e| e.access_count);
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
                last_accessed: now,
                access_seq: seq,
                access_count,
            },
        );
        self.counters.sets += 1;
        Ok(())
    }

    /// Look up a live entry. Expired entries are dropped and count as misses.
    pub fn get(&mut self, key: &str) -> Option<CachedValue> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            None => {
                self.counters.misses += 1;
                tracing::debug!(key, "cache miss");
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            self.entries.remove(key);
            self.counters.misses += 1;
            tracing::debug!(key, "cache miss (expired)");
            return None;
        }

        let seq = self.bump_seq();
        let entry = self.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed = now;
        entry.access_seq = seq;
        self.counters.hits += 1;
        tracing::debug!(key, "cache hit");
        Some(entry.value.clone())
    }

    /// Existence check that leaves hit/miss counters alone.
    pub fn has(&mut self, key: &str) -> bool {
        let now = self.clock.now();
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                self.entries.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.counters.deletes += 1;
        }
        removed
    }

    /// Remove everything, returning how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let size = self.entries.len();
        self.entries.clear();
        size
    }

    /// Eagerly drop expired entries, returning how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "cache cleanup");
        }
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn values(&self) -> Vec<CachedValue> {
        let now = self.clock.now();
        self.entries
            .values()
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<CacheEntryView> {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, e)| CacheEntryView {
                key: k.clone(),
                value: e.value.clone(),
                remaining_ttl: e.expires_at.saturating_duration_since(now),
                access_count: e.access_count,
            })
            .collect()
    }

    /// Change the capacity, evicting least-recently-accessed entries to fit.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        if new_size < 1 {
            return Err(KeyTrustError::InvalidArgument {
                detail: "cache max size must be at least 1".into(),
            });
        }
        self.max_size = new_size;
        while self.entries.len() > self.max_size {
            self.evict_lru();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let lookups = self.counters.hits + self.counters.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            self.counters.hits as f64 / lookups as f64 * 100.0
        };

        CacheStats {
            size: self.entries.len(),
            max_size: self.max_size,
            hits: self.counters.hits,
            misses: self.counters.misses,
            hit_rate,
            sets: self.counters.sets,
            deletes: self.counters.deletes,
            evictions: self.counters.evictions,
            utilization: self.entries.len() as f64 / self.max_size as f64 * 100.0,
            expired_count: self.entries.values().filter(|e| e.is_expired(now)).count(),
            total_size: self
                .entries
                .iter()
                .map(|(k, e)| k.len() + e.value.estimated_size())
                .sum(),
        }
    }

    pub fn reset_stats(&mut self) {
        self.counters = Counters::default();
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.last_accessed, e.access_seq))
            .map(|(k, _)| k.clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.counters.evictions += 1;
            tracing::debug!(key = %key, "cache eviction");
        }
    }
}
