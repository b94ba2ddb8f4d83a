// Result Cache
// Bounded, TTL-limited cache of MaskedResult keyed by (trimmed text, threshold, mode).
// Insertion order is eviction order; expired entries are dropped lazily on read
// and by the periodic sweep.

use indexmap::IndexMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{EffectiveOptions, MaskedResult};

/// Cache key derived from the trimmed text and the effective options.
pub fn cache_key(text: &str, options: &EffectiveOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    hasher.update([0u8]);
    hasher.update(options.threshold.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(options.mode.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

struct CacheEntry {
    result: MaskedResult,
    inserted_at: Instant,
}

pub struct ResultCache {
    entries: Mutex<IndexMap<String, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
    enabled: bool,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration, enabled: bool) -> Self {
        Self {
            entries: Mutex::new(IndexMap::with_capacity(capacity.min(1024))),
            capacity,
            ttl,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.capacity > 0
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        !self.ttl.is_zero() && entry.inserted_at.elapsed() < self.ttl
    }

    pub fn get(&self, key: &str) -> Option<MaskedResult> {
        if !self.is_enabled() {
            return None;
        }
        let mut entries = self.entries.lock();
        let fresh = entries.get(key).map(|e| self.is_fresh(e))?;
        if fresh {
            entries.get(key).map(|e| e.result.clone())
        } else {
            entries.shift_remove(key);
            None
        }
    }

    /// Store a successful result. Re-inserting a key refreshes its age and
    /// moves it to the back of the eviction order.
    pub fn put(&self, key: String, result: MaskedResult) {
        if !self.is_enabled() || !result.success {
            return;
        }
        let mut entries = self.entries.lock();
        entries.shift_remove(&key);
        entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
            },
        );
        while entries.len() > self.capacity {
            entries.shift_remove_index(0);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !self.ttl.is_zero() && e.inserted_at.elapsed() < self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("[CACHE] swept {} expired entries, {} remain", removed, entries.len());
        }
        removed
    }
}
