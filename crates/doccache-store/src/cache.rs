//! Cache backends.
//!
//! A [`CacheBackend`] is a key/value cache that understands exactly one
//! extra rule: every slot carries the [`StorageTimestamp`] of the write that
//! produced it, and [`CacheBackend::put_if_newer`] only replaces a slot with a
//! strictly newer one. [`MokaCacheBackend`] implements the rule atomically on
//! top of [`moka`]; [`NullCacheBackend`] is used when caching is disabled.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::timestamp::StorageTimestamp;

// ── cache stats ──────────────────────────────────────────────────────

/// Lookup and guarded-write counters of one cached collection.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    rejected: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl CacheStats {
    pub(crate) fn record_hit(&self) {
        bump(&self.hits);
    }

    pub(crate) fn record_miss(&self) {
        bump(&self.misses);
    }

    pub(crate) fn record_rejected(&self) {
        bump(&self.rejected);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Misses, including tombstones and pages older than the list watermark.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Guarded writes refused because the key already held an equal or newer
    /// timestamp.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Fraction of lookups served from the cache; `None` before the first one.
    pub fn hit_ratio(&self) -> Option<f64> {
        let (hits, misses) = (self.hits(), self.misses());
        match hits + misses {
            0 => None,
            lookups => Some(hits as f64 / lookups as f64),
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hits, {} misses, {} rejected", self.hits(), self.misses(), self.rejected())?;
        if let Some(ratio) = self.hit_ratio() {
            write!(f, " ({:.1}% hit)", ratio * 100.0)?;
        }
        Ok(())
    }
}

// ── backend contract ─────────────────────────────────────────────────

/// What a backend holds for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Serialized payload; `None` for tombstones, guard markers and payloads
    /// whose own TTL has elapsed.
    pub value: Option<String>,
    pub timestamp: StorageTimestamp,
}

/// A timestamped write handed to [`CacheBackend::put_if_newer`].
#[derive(Debug, Clone, PartialEq)]
pub struct GuardedWrite {
    /// `None` records a tombstone.
    pub value: Option<String>,
    pub timestamp: StorageTimestamp,
    /// How long the payload stays readable.
    pub value_ttl: Duration,
    /// How long the timestamp keeps guarding the key.
    pub guard_ttl: Duration,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>>;

    /// Store `write` unless the key already carries a timestamp greater than
    /// or equal to `write.timestamp`. Returns whether the write was applied.
    async fn put_if_newer(&self, key: &str, write: GuardedWrite) -> StoreResult<bool>;

    async fn invalidate(&self, key: &str) -> StoreResult<()>;

    /// Drop every key starting with `prefix`.
    async fn invalidate_prefix(&self, prefix: &str) -> StoreResult<()>;
}

// ── moka backend ─────────────────────────────────────────────────────

/// Longest lifetime a slot accepts; larger TTLs are clamped to it.
pub const MAX_SLOT_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct Slot {
    value: Option<String>,
    timestamp: StorageTimestamp,
    value_expires_at: Instant,
    guard_ttl: Duration,
}

impl Slot {
    fn new(write: GuardedWrite) -> Self {
        let value_ttl = write.value_ttl.min(MAX_SLOT_TTL);
        let guard_ttl = write.guard_ttl.min(MAX_SLOT_TTL).max(value_ttl);
        let now = Instant::now();
        Self {
            value: write.value,
            timestamp: write.timestamp,
            value_expires_at: now.checked_add(value_ttl).unwrap_or(now),
            guard_ttl,
        }
    }

    fn entry(&self) -> CacheEntry {
        let live = Instant::now() < self.value_expires_at;
        CacheEntry {
            value: self.value.clone().filter(|_| live),
            timestamp: self.timestamp,
        }
    }
}

/// Per-slot expiry: a slot lives as long as its guard.
struct GuardExpiry;

impl Expiry<String, Slot> for GuardExpiry {
    fn expire_after_create(&self, _key: &String, slot: &Slot, _created_at: Instant) -> Option<Duration> {
        Some(slot.guard_ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        slot: &Slot,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(slot.guard_ttl)
    }
}

/// In-process [`CacheBackend`] backed by `moka::future::Cache`.
///
/// ```ignore
/// let backend = MokaCacheBackend::builder("users")
///     .max_capacity(10_000)
///     .build();
/// ```
#[derive(Clone)]
pub struct MokaCacheBackend {
    name: &'static str,
    inner: Cache<String, Slot>,
}

impl MokaCacheBackend {
    pub fn builder(name: &'static str) -> MokaCacheBackendBuilder {
        MokaCacheBackendBuilder {
            name,
            max_capacity: 10_000,
        }
    }

    /// Return the current number of slots (values, tombstones and markers).
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Flush moka's pending maintenance so counts are exact.
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }
}

#[async_trait]
impl CacheBackend for MokaCacheBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        Ok(self.inner.get(key).await.map(|slot| slot.entry()))
    }

    async fn put_if_newer(&self, key: &str, write: GuardedWrite) -> StoreResult<bool> {
        let incoming = Slot::new(write);
        let timestamp = incoming.timestamp;

        let result = self
            .inner
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current {
                    Some(existing) if existing.value().timestamp >= incoming.timestamp => Op::Nop,
                    _ => Op::Put(incoming),
                };
                std::future::ready(op)
            })
            .await;

        let applied = matches!(result, CompResult::Inserted(_) | CompResult::ReplacedWith(_));
        debug!(cache = self.name, key, %timestamp, applied, "guarded put");
        Ok(applied)
    }

    async fn invalidate(&self, key: &str) -> StoreResult<()> {
        self.inner.invalidate(key).await;
        debug!(cache = self.name, key, "cache invalidate");
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> StoreResult<()> {
        let owned = prefix.to_string();
        self.inner
            .invalidate_entries_if(move |key, _| key.starts_with(&owned))
            .map_err(|e| StoreError::CacheUnavailable(e.to_string()))?;
        debug!(cache = self.name, prefix, "cache invalidate prefix");
        Ok(())
    }
}

/// Builder for [`MokaCacheBackend`].
pub struct MokaCacheBackendBuilder {
    name: &'static str,
    max_capacity: u64,
}

impl MokaCacheBackendBuilder {
    /// Maximum number of slots the cache will hold.
    pub fn max_capacity(mut self, cap: u64) -> Self {
        self.max_capacity = cap;
        self
    }

    pub fn build(self) -> MokaCacheBackend {
        let inner = Cache::builder()
            .max_capacity(self.max_capacity)
            .expire_after(GuardExpiry)
            .support_invalidation_closures()
            .build();

        debug!(
            name = self.name,
            max_capacity = self.max_capacity,
            "moka cache backend created"
        );

        MokaCacheBackend {
            name: self.name,
            inner,
        }
    }
}

// ── null backend ─────────────────────────────────────────────────────

/// Backend for stores running without a cache: every read misses and no
/// write is ever applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCacheBackend;

#[async_trait]
impl CacheBackend for NullCacheBackend {
    async fn get(&self, _key: &str) -> StoreResult<Option<CacheEntry>> {
        Ok(None)
    }

    async fn put_if_newer(&self, _key: &str, _write: GuardedWrite) -> StoreResult<bool> {
        Ok(false)
    }

    async fn invalidate(&self, _key: &str) -> StoreResult<()> {
        Ok(())
    }

    async fn invalidate_prefix(&self, _prefix: &str) -> StoreResult<()> {
        Ok(())
    }
}

/// Shared handle to any backend.
pub type SharedCacheBackend = Arc<dyn CacheBackend>;

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MokaCacheBackend {
        MokaCacheBackend::builder("test").max_capacity(100).build()
    }

    fn write(value: Option<&str>, seconds: i64) -> GuardedWrite {
        GuardedWrite {
            value: value.map(str::to_string),
            timestamp: StorageTimestamp::new(seconds, 0),
            value_ttl: Duration::from_secs(60),
            guard_ttl: Duration::from_secs(600),
        }
    }

    #[tokio::test]
    async fn newer_write_replaces_older() {
        let cache = backend();
        assert!(cache.put_if_newer("k", write(Some("v1"), 1)).await.unwrap());
        assert!(cache.put_if_newer("k", write(Some("v2"), 2)).await.unwrap());

        let entry = cache.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value.as_deref(), Some("v2"));
        assert_eq!(entry.timestamp, StorageTimestamp::new(2, 0));
    }

    #[tokio::test]
    async fn older_and_equal_writes_lose() {
        let cache = backend();
        cache.put_if_newer("k", write(Some("v2"), 2)).await.unwrap();
        assert!(!cache.put_if_newer("k", write(Some("v1"), 1)).await.unwrap());
        assert!(!cache.put_if_newer("k", write(Some("again"), 2)).await.unwrap());

        let entry = cache.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn tombstone_blocks_stale_resurrection() {
        let cache = backend();
        cache.put_if_newer("k", write(Some("v1"), 1)).await.unwrap();
        assert!(cache.put_if_newer("k", write(None, 3)).await.unwrap());
        assert!(!cache.put_if_newer("k", write(Some("late"), 2)).await.unwrap());

        let entry = cache.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, None);
        assert_eq!(entry.timestamp, StorageTimestamp::new(3, 0));
    }

    #[tokio::test]
    async fn expired_payload_keeps_guard() {
        let cache = backend();
        let mut short = write(Some("v1"), 5);
        short.value_ttl = Duration::ZERO;
        cache.put_if_newer("k", short).await.unwrap();

        let entry = cache.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, None);
        assert!(!cache.put_if_newer("k", write(Some("stale"), 4)).await.unwrap());
    }

    #[tokio::test]
    async fn unbounded_ttls_are_clamped() {
        let cache = backend();
        let mut forever = write(Some("v1"), 1);
        forever.value_ttl = Duration::MAX;
        forever.guard_ttl = Duration::MAX;
        assert!(cache.put_if_newer("k", forever).await.unwrap());

        let entry = cache.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value.as_deref(), Some("v1"));

        let slot = Slot::new(GuardedWrite {
            value: None,
            timestamp: StorageTimestamp::new(2, 0),
            value_ttl: Duration::MAX,
            guard_ttl: Duration::ZERO,
        });
        assert_eq!(slot.guard_ttl, MAX_SLOT_TTL);
    }

    #[tokio::test]
    async fn invalidate_prefix_drops_matching_keys() {
        let cache = backend();
        cache.put_if_newer("users:list:a", write(Some("[]"), 1)).await.unwrap();
        cache.put_if_newer("users:list:b", write(Some("[]"), 1)).await.unwrap();
        cache.put_if_newer("users:42", write(Some("{}"), 1)).await.unwrap();

        cache.invalidate_prefix("users:list:").await.unwrap();

        assert!(cache.get("users:list:a").await.unwrap().is_none());
        assert!(cache.get("users:list:b").await.unwrap().is_none());
        assert!(cache.get("users:42").await.unwrap().is_some());

        cache.sync().await;
        assert_eq!(cache.entry_count(), 1);
    }

    #[tokio::test]
    async fn invalidate_removes_slot() {
        let cache = backend();
        cache.put_if_newer("k", write(Some("v"), 1)).await.unwrap();
        cache.invalidate("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.put_if_newer("k", write(Some("old"), 0)).await.unwrap());
    }

    #[tokio::test]
    async fn null_backend_never_holds_anything() {
        let cache = NullCacheBackend;
        assert!(!cache.put_if_newer("k", write(Some("v"), 1)).await.unwrap());
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[test]
    fn stats_summary() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_ratio(), None);
        assert_eq!(stats.to_string(), "0 hits, 0 misses, 0 rejected");

        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_rejected();
        assert_eq!(stats.hit_ratio(), Some(0.75));
        assert_eq!(stats.to_string(), "3 hits, 1 misses, 1 rejected (75.0% hit)");
    }
}
