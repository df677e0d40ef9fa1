//! Timestamp-guarded record cache.
//!
//! Every write or delete carries the storage timestamp of the operation that
//! produced it and is applied only when no equal or later timestamp has been
//! recorded for the key. A slow writer that finishes last but was stamped
//! first therefore cannot overwrite a faster, newer write.
//!
//! Key layout inside the backend, per collection `prefix`:
//!
//! ```text
//! {prefix}:doc:{id}             one record (or its tombstone)
//! {prefix}:list:{query key}     one cached page
//! {prefix}:lists-watermark      newest write that invalidated the pages
//! ```

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStats, GuardedWrite, SharedCacheBackend};
use crate::error::StoreResult;
use crate::query::QueryCacheKey;
use crate::timestamp::StorageTimestamp;

/// Default lifetime of a cached record or page.
pub const DEFAULT_VALUE_TTL: Duration = Duration::from_secs(300);

/// Default lifetime of a guard marker.
pub const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(600);

pub struct TimestampGuardedCache<T> {
    prefix: String,
    backend: SharedCacheBackend,
    value_ttl: Duration,
    guard_ttl: Duration,
    stats: Arc<CacheStats>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TimestampGuardedCache<T> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            backend: Arc::clone(&self.backend),
            value_ttl: self.value_ttl,
            guard_ttl: self.guard_ttl,
            stats: Arc::clone(&self.stats),
            _marker: PhantomData,
        }
    }
}

impl<T> TimestampGuardedCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(prefix: impl Into<String>, backend: SharedCacheBackend) -> Self {
        Self {
            prefix: prefix.into(),
            backend,
            value_ttl: DEFAULT_VALUE_TTL,
            guard_ttl: DEFAULT_TOMBSTONE_TTL,
            stats: Arc::new(CacheStats::default()),
            _marker: PhantomData,
        }
    }

    /// Set the payload TTL and the guard-marker TTL. The guard never expires
    /// before the payload it protects.
    pub fn with_ttls(mut self, value_ttl: Duration, tombstone_ttl: Duration) -> Self {
        self.value_ttl = value_ttl;
        self.guard_ttl = tombstone_ttl.max(value_ttl);
        self
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // ── single records ───────────────────────────────────────────────

    /// Cached record for `id`, or `None` on a miss or tombstone.
    ///
    /// Backend failures on this path count as misses.
    pub async fn get(&self, id: &str) -> Option<T> {
        let key = self.doc_key(id);
        let entry = self.read(&key).await;
        self.decode(&key, entry).await
    }

    /// Cache `value` under `id` unless a write stamped at or after
    /// `timestamp` is already recorded. Returns whether it was applied.
    pub async fn set_guarded(&self, id: &str, value: &T, timestamp: StorageTimestamp) -> StoreResult<bool> {
        let json = serde_json::to_string(value)?;
        let key = self.doc_key(id);
        self.put(&key, Some(json), timestamp).await
    }

    /// Replace the entry for `id` with a tombstone, under the same guard as
    /// [`set_guarded`](Self::set_guarded).
    pub async fn del_guarded(&self, id: &str, timestamp: StorageTimestamp) -> StoreResult<bool> {
        let key = self.doc_key(id);
        self.put(&key, None, timestamp).await
    }

    // ── list pages ───────────────────────────────────────────────────

    /// Cached page for `query`, unless it was read at or before the last
    /// list invalidation.
    pub async fn get_list(&self, query: &QueryCacheKey) -> Option<Vec<T>> {
        let key = self.list_key(query);
        let entry = self.read(&key).await;
        if let Some(page) = &entry {
            let watermark = self.watermark().await;
            if watermark.is_some_and(|mark| page.timestamp <= mark) {
                debug!(cache = %self.prefix, key, "list page older than watermark");
                self.stats.record_miss();
                return None;
            }
        }
        self.decode(&key, entry).await
    }

    /// Cache a page read at `read_time`. Pages read at or before the list
    /// watermark are refused.
    pub async fn set_list(&self, query: &QueryCacheKey, page: &[T], read_time: StorageTimestamp) -> StoreResult<bool> {
        let watermark_key = self.watermark_key();
        let watermark = self.backend.get(&watermark_key).await?.map(|e| e.timestamp);
        if watermark.is_some_and(|mark| read_time <= mark) {
            debug!(cache = %self.prefix, %read_time, "list page rejected by watermark");
            self.stats.record_rejected();
            return Ok(false);
        }

        let json = serde_json::to_string(page)?;
        let key = self.list_key(query);
        self.put(&key, Some(json), read_time).await
    }

    /// Drop every cached page of this collection.
    pub async fn del_lists(&self) -> StoreResult<()> {
        let prefix = format!("{}:list:", self.prefix);
        self.backend.invalidate_prefix(&prefix).await
    }

    /// Record a write at `timestamp` that may change any page, then drop the
    /// pages.
    pub async fn invalidate_lists(&self, timestamp: StorageTimestamp) -> StoreResult<()> {
        let write = GuardedWrite {
            value: None,
            timestamp,
            value_ttl: Duration::ZERO,
            guard_ttl: self.guard_ttl,
        };
        self.backend.put_if_newer(&self.watermark_key(), write).await?;
        self.del_lists().await
    }

    // ── internals ────────────────────────────────────────────────────

    fn doc_key(&self, id: &str) -> String {
        format!("{}:doc:{id}", self.prefix)
    }

    fn list_key(&self, query: &QueryCacheKey) -> String {
        format!("{}:list:{query}", self.prefix)
    }

    fn watermark_key(&self) -> String {
        format!("{}:lists-watermark", self.prefix)
    }

    async fn watermark(&self) -> Option<StorageTimestamp> {
        self.read(&self.watermark_key()).await.map(|e| e.timestamp)
    }

    async fn read(&self, key: &str) -> Option<CacheEntry> {
        match self.backend.get(key).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(cache = %self.prefix, key, %err, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn put(&self, key: &str, value: Option<String>, timestamp: StorageTimestamp) -> StoreResult<bool> {
        let write = GuardedWrite {
            value,
            timestamp,
            value_ttl: self.value_ttl,
            guard_ttl: self.guard_ttl,
        };
        let applied = self.backend.put_if_newer(key, write).await?;
        if !applied {
            self.stats.record_rejected();
            debug!(cache = %self.prefix, key, %timestamp, "guarded write rejected");
        }
        Ok(applied)
    }

    async fn decode<V: DeserializeOwned>(&self, key: &str, entry: Option<CacheEntry>) -> Option<V> {
        let Some(json) = entry.and_then(|e| e.value) else {
            self.stats.record_miss();
            debug!(cache = %self.prefix, key, "cache miss");
            return None;
        };

        match serde_json::from_str::<V>(&json) {
            Ok(value) => {
                self.stats.record_hit();
                debug!(cache = %self.prefix, key, "cache hit");
                Some(value)
            }
            Err(err) => {
                // Corrupted entry: evict and treat as miss.
                warn!(cache = %self.prefix, key, %err, "cache entry deserialization failed, evicting");
                if let Err(err) = self.backend.invalidate(key).await {
                    warn!(cache = %self.prefix, key, %err, "eviction failed");
                }
                self.stats.record_miss();
                None
            }
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
