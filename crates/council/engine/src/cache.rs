//! Time-bounded memoization
//!
//! Two process-wide instances exist: the decision cache, keyed by a coarse
//! fingerprint of decision-relevant session state, and the response cache,
//! keyed by the hash of a raw narrative prompt. Entries past their TTL are
//! misses on read and are purged by the eviction sweep. Concurrent writers
//! race benignly; the last write wins.

use council_types::{CollaborationSession, Decision};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// A cached value with its insertion time
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > ttl
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired_removed: u64,
    pub current_entries: usize,
}

impl CacheStats {
    /// Cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL cache keyed by content hash
pub struct TtlCache<V> {
    name: &'static str,
    ttl: Duration,
    entries: DashMap<String, CacheEntry<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired_removed: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired_removed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a key; an expired entry is dropped and reported as a miss
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired
            && self
                .entries
                .remove_if(key, |_, entry| entry.is_expired(self.ttl, now))
                .is_some()
        {
            self.expired_removed.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry older than the TTL, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.is_expired(self.ttl, now));
        let removed = before.saturating_sub(self.entries.len());
        self.expired_removed
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired_removed: self.expired_removed.load(Ordering::Relaxed),
            current_entries: self.entries.len(),
        }
    }
}

/// Decisions keyed by session fingerprint
pub type DecisionCache = TtlCache<Decision>;

/// Narrative text keyed by prompt hash
pub type ResponseCache = TtlCache<String>;

/// Coarse fingerprint of "has anything decision-relevant changed"
pub fn decision_fingerprint(session: &CollaborationSession) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(session.id.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(session.status.as_str().as_bytes());
    hasher.update(&(session.participants.len() as u64).to_le_bytes());
    hasher.update(&(session.messages.len() as u64).to_le_bytes());
    hasher.update(&session.metrics.consensus_level.to_bits().to_le_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Response cache key for a raw prompt
pub fn prompt_key(prompt: &str) -> String {
    blake3::hash(prompt.as_bytes()).to_hex().to_string()
}
