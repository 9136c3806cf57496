//! Fingerprint-keyed response cache.
//!
//! Mirrors the teacher's `proxy::response_cache` key-then-hash shape, but
//! hashes the complete sanitised body instead of a fixed field subset, and
//! stores entries purely in-process rather than behind a Redis tier — this
//! component has no need for a cross-process cache (see DESIGN.md).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Headers dropped on both insertion and retrieval so stale framing from one
/// response is never replayed on another.
const STRIPPED_HEADERS: &[&str] = &[
    "transfer-encoding",
    "content-length",
    "connection",
    "keep-alive",
    "content-encoding",
];

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub inserted_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Value, ttl: Duration, now: Instant) -> Self {
        Self {
            status,
            headers: filter_headers(headers),
            body,
            inserted_at: now,
            expires_at: now + ttl,
        }
    }
}

fn filter_headers(headers: Vec<(String, String)>) -> Vec<(String, String)> {
    headers
        .into_iter()
        .filter(|(name, _)| !STRIPPED_HEADERS.contains(&name.to_lowercase().as_str()))
        .collect()
}

/// SHA-256 over the canonical JSON tuple `(provider, path, body)`. `serde_json`
/// preserves map insertion order rather than sorting keys, so callers must
/// build `body` through a deterministic sanitisation/serialisation path for
/// the fingerprint to be stable across equivalent requests.
pub fn fingerprint(provider: &str, path: &str, body: &Value) -> String {
    let canonical = serde_json::json!([provider, path, body]);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
}

impl CacheStats {
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the entry if present and unexpired as of `now`. Expired
    /// entries are evicted lazily on access rather than via a separate sweep.
    pub fn get(&self, fingerprint: &str, now: Instant) -> Option<CacheEntry> {
        let hit = self
            .entries
            .get(fingerprint)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.clone());

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            // An expired entry still occupying the slot is worth dropping now.
            if let Some(stale) = self.entries.get(fingerprint) {
                if now >= stale.expires_at {
                    drop(stale);
                    self.entries.remove(fingerprint);
                }
            }
        }

        hit
    }

    pub fn put(&self, fingerprint: String, entry: CacheEntry) {
        self.entries.insert(fingerprint, entry);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.len() as u64,
        }
    }

    /// Drop all expired entries. Called from the hourly sweep job; the cache
    /// otherwise relies on lazy eviction in `get`.
    pub fn evict_expired(&self, now: Instant) {
        self.entries.retain(|_, entry| now < entry.expires_at);
    }
}
