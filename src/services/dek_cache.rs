//! In-memory cache of unwrapped per-user DEKs.
//!
//! Avoids a KMS `Decrypt` round trip on every record read/write.
//! - O(1) lookup using DashMap
//! - Entries expire after a configurable TTL (default 24h)
//! - Bounded: at capacity, expired entries are purged first, then the least
//!   recently used entry is evicted
//!
//! Plaintext key material lives only here and on the stack during field
//! operations; evicted and dropped entries zeroize themselves.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::{Duration, Instant},
};
use uuid::Uuid;

use crate::kms::DataKey;

/// Recency clock base. Entry timestamps are milliseconds since this epoch,
/// which keeps `last_used` updatable through a shared reference.
static PROCESS_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

fn now_millis() -> u64 {
    PROCESS_EPOCH.elapsed().as_millis() as u64
}

struct CacheEntry {
    dek: DataKey,
    expires_at: Instant,
    last_used: AtomicU64,
}

/// Bounded TTL cache of unwrapped DEKs, keyed by user id.
#[derive(Clone)]
pub struct DekCache {
    entries: Arc<DashMap<Uuid, CacheEntry>>,
    capacity: usize,
}

impl DekCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            capacity,
        }
    }

    /// Look up a user's DEK. Expired entries miss and are removed.
    pub fn get(&self, user_id: &Uuid) -> Option<DataKey> {
        match self.entries.get(user_id) {
            None => return None,
            Some(entry) if Instant::now() < entry.expires_at => {
                entry.last_used.store(now_millis(), Ordering::Relaxed);
                return Some(entry.dek.clone());
            }
            Some(_) => {}
        }

        // Stale entry. The read guard is gone by now; re-check expiry under
        // the write lock so a concurrent refresh is not thrown away.
        self.entries
            .remove_if(user_id, |_, entry| Instant::now() >= entry.expires_at);
        None
    }

    /// Cache a user's DEK for `ttl`. Replaces any existing entry for the user.
    pub fn insert(&self, user_id: Uuid, dek: DataKey, ttl: Duration) {
        // Overwriting a user's own entry never needs an eviction.
        if !self.entries.contains_key(&user_id) && self.entries.len() >= self.capacity {
            self.make_room();
        }

        let now = Instant::now();
        self.entries.insert(
            user_id,
            CacheEntry {
                dek,
                expires_at: now + ttl,
                last_used: AtomicU64::new(now_millis()),
            },
        );
    }

    /// Drop one user's cached DEK. Called synchronously after key rotation so
    /// the next operation fetches the new key.
    pub fn invalidate(&self, user_id: &Uuid) {
        if self.entries.remove(user_id).is_some() {
            tracing::debug!("Invalidated cached DEK for user {}", user_id);
        }
    }

    /// Drop every cached DEK.
    pub fn invalidate_all(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        tracing::info!("Invalidated all {} cached DEKs", dropped);
    }

    fn make_room(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| now < entry.expires_at);

        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().last_used.load(Ordering::Relaxed))
                .map(|entry| *entry.key());

            match oldest {
                Some(user_id) => {
                    self.entries.remove(&user_id);
                    tracing::debug!("Evicted least recently used DEK for user {}", user_id);
                }
                None => break,
            }
        }
    }

    /// Get statistics for monitoring. Read-only: expired entries are counted,
    /// not removed.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut stats = CacheStats {
            total_entries: self.entries.len(),
            active_entries: 0,
            expired_entries: 0,
            capacity: self.capacity,
        };

        for entry in self.entries.iter() {
            if now >= entry.expires_at {
                stats.expired_entries += 1;
            } else {
                stats.active_entries += 1;
            }
        }

        stats
    }
}

/// Statistics about cache state
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub active_entries: usize,
    pub expired_entries: usize,
    pub capacity: usize,
}
