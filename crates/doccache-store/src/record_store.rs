//! Cached CRUD and query surface over one collection.
//!
//! [`RecordStore`] owns a [`TimestampGuardedCache`] rather than being one:
//! storage is always written first, and the cache is then updated under the
//! storage timestamp of that write, so concurrent writers settle on whichever
//! write the store applied last.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, MokaCacheBackend, NullCacheBackend, SharedCacheBackend};
use crate::config::StoreConfig;
use crate::document_store::DocumentStore;
use crate::error::{StoreError, StoreResult};
use crate::guarded_cache::{DEFAULT_TOMBSTONE_TTL, DEFAULT_VALUE_TTL, TimestampGuardedCache};
use crate::paginator::CursorPaginator;
use crate::patch::Patch;
use crate::query::{Query, Sort};
use crate::record::{
    CREATED_AT_FIELD, ID_FIELD, JsonCodec, Record, RecordCodec, UPDATED_AT_FIELD,
    require_timestamp,
};
use crate::timestamp::StorageTimestamp;
use crate::value::{Document, Value};

/// Default page size (and delete concurrency) of [`RecordStore::remove_by_query`].
pub const DEFAULT_REMOVE_PAGE_SIZE: usize = 25;

// ═══════════════════════════════════════════════════════════════════════
//  RecordStore
// ═══════════════════════════════════════════════════════════════════════

pub struct RecordStore<T: Record> {
    collection: String,
    store: Arc<dyn DocumentStore>,
    codec: Arc<dyn RecordCodec<T>>,
    cache: TimestampGuardedCache<T>,
    paginator: CursorPaginator,
    remove_page_size: usize,
}

impl<T: Record> Clone for RecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            store: Arc::clone(&self.store),
            codec: Arc::clone(&self.codec),
            cache: self.cache.clone(),
            paginator: self.paginator,
            remove_page_size: self.remove_page_size,
        }
    }
}

impl<T: Record> RecordStore<T> {
    pub fn builder(collection: impl Into<String>) -> RecordStoreBuilder<T> {
        RecordStoreBuilder {
            collection: collection.into(),
            store: None,
            codec: None,
            cache_backend: None,
            value_ttl: DEFAULT_VALUE_TTL,
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
            remove_page_size: DEFAULT_REMOVE_PAGE_SIZE,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    // ── writes ───────────────────────────────────────────────────────

    /// Insert a new record.
    ///
    /// Fails with [`StoreError::ValidationFailed`] before touching storage when
    /// the record is invalid or its date fields are not timestamps, and with
    /// [`StoreError::AlreadyExists`] when the id is taken.
    #[instrument(skip(self, record), fields(collection = %self.collection, id = record.id()))]
    pub async fn create(&self, record: &T) -> StoreResult<T> {
        record.validate()?;

        let id = record.id().to_string();
        let mut doc = self.codec.to_storage(record)?;
        require_timestamp(&doc, CREATED_AT_FIELD)?;
        require_timestamp(&doc, UPDATED_AT_FIELD)?;
        doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));

        let written = self
            .store
            .create(&self.collection, &id, doc.clone())
            .await?;
        let created = self.codec.from_storage(&id, doc)?;

        self.cache.invalidate_lists(written).await?;
        self.cache.set_guarded(&id, &created, written).await?;

        debug!(%written, "record created");
        Ok(created)
    }

    /// Deep-merge `patch` into the stored record and refresh `updatedAt`.
    ///
    /// `id` and `createdAt` in the patch are ignored. Returns the merged
    /// record as read back from storage.
    #[instrument(skip(self, patch), fields(collection = %self.collection, ops = patch.len()))]
    pub async fn patch(&self, id: &str, patch: Patch, now: DateTime<Utc>) -> StoreResult<T> {
        let patch = patch
            .without(ID_FIELD)
            .without(CREATED_AT_FIELD)
            .set(UPDATED_AT_FIELD, now);

        let written = self.store.update(&self.collection, id, &patch).await?;

        let snapshot = self.store.get(&self.collection, id).await?;
        let version = snapshot.version();
        let Some(doc) = snapshot.document else {
            return Err(self.not_found(id, false));
        };
        let merged = self.codec.from_storage(id, doc)?;

        self.cache.set_guarded(id, &merged, version).await?;
        self.cache.invalidate_lists(written).await?;

        debug!(%written, "record patched");
        Ok(merged)
    }

    /// Overwrite the stored record, keeping its original `createdAt` and
    /// refreshing `updatedAt`.
    #[instrument(skip(self, record), fields(collection = %self.collection))]
    pub async fn update(&self, id: &str, record: &T, now: DateTime<Utc>) -> StoreResult<T> {
        record.validate()?;

        let existing = self.get_or_throw(id, false).await?;
        let created_at = self.codec.to_storage(&existing)?.remove(CREATED_AT_FIELD);

        let mut doc = self.codec.to_storage(record)?;
        doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        doc.insert(UPDATED_AT_FIELD.to_string(), Value::Timestamp(now));
        match created_at {
            Some(created_at) => doc.insert(CREATED_AT_FIELD.to_string(), created_at),
            None => doc.remove(CREATED_AT_FIELD),
        };

        let written = self.store.set(&self.collection, id, doc.clone()).await?;
        let updated = self.codec.from_storage(id, doc)?;

        self.cache.set_guarded(id, &updated, written).await?;
        self.cache.invalidate_lists(written).await?;

        debug!(%written, "record updated");
        Ok(updated)
    }

    /// Delete a record. Removing an absent id succeeds.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn remove(&self, id: &str) -> StoreResult<()> {
        let (written, cached) = self.remove_one(id).await?;
        self.cache.invalidate_lists(written).await?;
        cached?;
        debug!(%written, "record removed");
        Ok(())
    }

    /// Delete every record matching `query` and return their ids.
    ///
    /// Without `paginate` the matches are read in one scan. With it, the
    /// matches are walked in pages of `page_size` ordered by id, each page
    /// fully deleted before the next is read; the query's sort, offset,
    /// limit and cursors do not apply in that mode. At most `page_size`
    /// deletes are in flight at once.
    ///
    /// When a delete fails, the deletes already committed still invalidate
    /// the cached pages before the first failure is returned.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn remove_by_query(
        &self,
        query: &Query,
        paginate: bool,
        page_size: Option<usize>,
    ) -> StoreResult<Vec<String>> {
        let page_size = page_size.unwrap_or(self.remove_page_size);
        if page_size == 0 {
            return Err(StoreError::InvalidQuery("page size must be positive".into()));
        }

        let mut removed = Vec::new();
        let mut newest: Option<StorageTimestamp> = None;
        let mut failure: Option<StoreError> = None;

        if paginate {
            let ignored = query.sort.is_some()
                || query.offset.is_some()
                || query.limit.is_some()
                || query.before.is_some()
                || query.after.is_some();
            if ignored {
                debug!("paginated removal pages by id; sort, offset, limit and cursors ignored");
            }

            let mut after: Option<Value> = None;
            loop {
                let page = Query {
                    filters: query.filters.clone(),
                    sort: Some(Sort::asc(ID_FIELD)),
                    limit: Some(page_size),
                    after: after.take(),
                    ..Query::default()
                };
                let ids = match self.matching_ids(&page).await {
                    Ok(ids) => ids,
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                };
                let full = ids.len() >= page_size;

                let (written, failed) = self.remove_all(&ids, page_size).await;
                newest = newest.max(written);
                if failed.is_some() {
                    failure = failed;
                    break;
                }
                after = ids.last().cloned().map(Value::String);
                removed.extend(ids);

                if !full {
                    break;
                }
            }
        } else {
            let ids = self.matching_ids(query).await?;
            let (written, failed) = self.remove_all(&ids, page_size).await;
            newest = written;
            failure = failed;
            removed = ids;
        }

        if let Some(written) = newest {
            if let Err(err) = self.cache.invalidate_lists(written).await {
                match &failure {
                    None => return Err(err),
                    Some(_) => warn!(%err, "list invalidation after partial removal failed"),
                }
            }
        }
        if let Some(err) = failure {
            warn!(%err, removed = removed.len(), "removal by query stopped");
            return Err(err);
        }

        info!(removed = removed.len(), paginate, "records removed by query");
        Ok(removed)
    }

    // ── reads ────────────────────────────────────────────────────────

    /// Fetch a record, cache first.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<T>> {
        if let Some(cached) = self.cache.get(id).await {
            return Ok(Some(cached));
        }

        let snapshot = self.store.get(&self.collection, id).await?;
        let version = snapshot.version();

        match snapshot.document {
            Some(doc) => {
                let record = self.codec.from_storage(id, doc)?;
                self.cache.set_guarded(id, &record, version).await?;
                Ok(Some(record))
            }
            None => {
                self.cache.del_guarded(id, version).await?;
                Ok(None)
            }
        }
    }

    /// Fetch a record or fail with [`StoreError::NotFound`], reported as a
    /// client-facing "not found" when `user_facing` is set and as an internal
    /// error otherwise.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn get_or_throw(&self, id: &str, user_facing: bool) -> StoreResult<T> {
        self.get(id)
            .await?
            .ok_or_else(|| self.not_found(id, user_facing))
    }

    /// Whether a document with `id` is stored. Reads storage directly.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.store.get(&self.collection, id).await?.exists())
    }

    /// Records matching `query`, in the order its sort requests.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn query(&self, query: &Query) -> StoreResult<Vec<T>> {
        let plan = self.paginator.plan(query)?;
        let key = query.cache_key()?;

        if let Some(page) = self.cache.get_list(&key).await {
            return Ok(page);
        }

        let result = self.store.query(&self.collection, &plan.request).await?;
        let records = result
            .documents
            .into_iter()
            .map(|(id, doc)| self.codec.from_storage(&id, doc))
            .collect::<StoreResult<Vec<T>>>()?;
        let records = plan.finish(records);

        self.cache.set_list(&key, &records, result.read_time).await?;
        debug!(count = records.len(), read_time = %result.read_time, "query served from storage");
        Ok(records)
    }

    /// The stored document for `id`, bypassing cache and codec.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn raw_get(&self, id: &str) -> StoreResult<Option<Document>> {
        let snapshot = self.store.get(&self.collection, id).await?;
        Ok(snapshot.document.map(|doc| with_id(id, doc)))
    }

    /// Stored documents matching `query`, bypassing cache and codec.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn raw_query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let plan = self.paginator.plan(query)?;
        let result = self.store.query(&self.collection, &plan.request).await?;
        let docs = result
            .documents
            .into_iter()
            .map(|(id, doc)| with_id(&id, doc))
            .collect();
        Ok(plan.finish(docs))
    }

    // ── internals ────────────────────────────────────────────────────

    /// Delete `id`, then tombstone its cache entry. The outer error means
    /// nothing was deleted; the inner result is the cache write that followed
    /// a committed delete.
    async fn remove_one(&self, id: &str) -> StoreResult<(StorageTimestamp, StoreResult<bool>)> {
        let written = self.store.delete(&self.collection, id).await?;
        let cached = self.cache.del_guarded(id, written).await;
        Ok((written, cached))
    }

    /// Delete `ids` with at most `concurrency` deletes in flight. Returns the
    /// newest committed delete timestamp and the first failure, if any.
    async fn remove_all(
        &self,
        ids: &[String],
        concurrency: usize,
    ) -> (Option<StorageTimestamp>, Option<StoreError>) {
        let outcomes: Vec<_> = stream::iter(ids)
            .map(|id| self.remove_one(id))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut newest = None;
        let mut failure = None;
        for outcome in outcomes {
            match outcome {
                Ok((written, cached)) => {
                    newest = newest.max(Some(written));
                    if let Err(err) = cached {
                        failure = failure.or(Some(err));
                    }
                }
                Err(err) => failure = failure.or(Some(err)),
            }
        }
        (newest, failure)
    }

    async fn matching_ids(&self, query: &Query) -> StoreResult<Vec<String>> {
        let plan = self.paginator.plan(query)?;
        let result = self.store.query(&self.collection, &plan.request).await?;
        let ids = result.documents.into_iter().map(|(id, _)| id).collect();
        Ok(plan.finish(ids))
    }

    fn not_found(&self, id: &str, user_facing: bool) -> StoreError {
        StoreError::NotFound {
            collection: self.collection.clone(),
            id: id.to_string(),
            user_facing,
        }
    }
}

fn with_id(id: &str, mut doc: Document) -> Document {
    doc.entry(ID_FIELD.to_string())
        .or_insert_with(|| Value::String(id.to_string()));
    doc
}

// ═══════════════════════════════════════════════════════════════════════
//  Builder
// ═══════════════════════════════════════════════════════════════════════

/// Builder for [`RecordStore`]. A document store and a codec are required;
/// without a cache backend every read goes to storage.
pub struct RecordStoreBuilder<T: Record> {
    collection: String,
    store: Option<Arc<dyn DocumentStore>>,
    codec: Option<Arc<dyn RecordCodec<T>>>,
    cache_backend: Option<SharedCacheBackend>,
    value_ttl: Duration,
    tombstone_ttl: Duration,
    remove_page_size: usize,
}

impl<T: Record> RecordStoreBuilder<T> {
    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn RecordCodec<T>>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Use [`JsonCodec`] for `T`.
    pub fn json_codec(self) -> Self {
        self.codec(Arc::new(JsonCodec::<T>::new()))
    }

    pub fn cache_backend(mut self, backend: SharedCacheBackend) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    /// Lifetime of cached records and pages, and of guard markers.
    pub fn ttls(mut self, value_ttl: Duration, tombstone_ttl: Duration) -> Self {
        self.value_ttl = value_ttl;
        self.tombstone_ttl = tombstone_ttl;
        self
    }

    pub fn remove_page_size(mut self, page_size: usize) -> Self {
        self.remove_page_size = page_size;
        self
    }

    /// Apply the `[cache]` and `[remove]` sections of `config`, creating a
    /// moka backend when caching is enabled.
    pub fn with_config(mut self, config: &StoreConfig) -> Self {
        if config.cache.enabled {
            let backend = MokaCacheBackend::builder("records")
                .max_capacity(config.cache.max_capacity)
                .build();
            self.cache_backend = Some(Arc::new(backend));
        }
        self.value_ttl = Duration::from_secs(config.cache.ttl_seconds);
        self.tombstone_ttl = Duration::from_secs(config.cache.tombstone_ttl_seconds);
        self.remove_page_size = config.remove.page_size;
        self
    }

    pub fn build(self) -> StoreResult<RecordStore<T>> {
        if self.collection.is_empty() {
            return Err(StoreError::NotConfigured("collection name is empty".into()));
        }
        let store = self
            .store
            .ok_or_else(|| StoreError::NotConfigured("no document store".into()))?;
        let codec = self
            .codec
            .ok_or_else(|| StoreError::NotConfigured("no record codec".into()))?;

        let cached = self.cache_backend.is_some();
        let backend = self
            .cache_backend
            .unwrap_or_else(|| Arc::new(NullCacheBackend));
        let cache = TimestampGuardedCache::new(self.collection.clone(), backend)
            .with_ttls(self.value_ttl, self.tombstone_ttl);

        info!(collection = %self.collection, cached, "record store ready");

        Ok(RecordStore {
            collection: self.collection,
            store,
            codec,
            cache,
            paginator: CursorPaginator::new(),
            remove_page_size: self.remove_page_size,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryDocumentStore;
    use crate::query::FilterOperator;
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Task {
        id: String,
        title: String,
        priority: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl Record for Task {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 1, day, 0, 0, 0).unwrap()
    }

    fn task(id: &str, priority: i64) -> Task {
        Task {
            id: id.into(),
            title: format!("task {id}"),
            priority,
            created_at: at(1),
            updated_at: at(1),
        }
    }

    fn store_with(documents: MemoryDocumentStore) -> RecordStore<Task> {
        RecordStore::builder("tasks")
            .store(Arc::new(documents))
            .json_codec()
            .cache_backend(Arc::new(MokaCacheBackend::builder("tasks").build()))
            .build()
            .unwrap()
    }

    #[test]
    fn build_requires_store_and_codec() {
        let missing_store = RecordStore::<Task>::builder("tasks").json_codec().build();
        assert!(matches!(missing_store, Err(StoreError::NotConfigured(_))));

        let missing_codec = RecordStore::<Task>::builder("tasks")
            .store(Arc::new(MemoryDocumentStore::new()))
            .build();
        assert!(matches!(missing_codec, Err(StoreError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn create_then_get_hits_cache() {
        let store = store_with(MemoryDocumentStore::new());
        store.create(&task("a", 1)).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(task("a", 1)));
        assert_eq!(store.cache_stats().hits(), 1);
    }

    #[tokio::test]
    async fn get_missing_caches_tombstone() {
        let documents = MemoryDocumentStore::new();
        let store = store_with(documents.clone());

        assert_eq!(store.get("ghost").await.unwrap(), None);
        let err = store.get_or_throw("ghost", true).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
        let err = store.get_or_throw("ghost", false).await.unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn patch_strips_identity_fields() {
        let store = store_with(MemoryDocumentStore::new());
        store.create(&task("a", 1)).await.unwrap();

        let patch = Patch::new()
            .set("priority", 7)
            .set("id", "hijack")
            .set("createdAt", at(9));
        let patched = store.patch("a", patch, at(5)).await.unwrap();

        assert_eq!(patched.id, "a");
        assert_eq!(patched.priority, 7);
        assert_eq!(patched.created_at, at(1));
        assert_eq!(patched.updated_at, at(5));
        assert_eq!(store.get("a").await.unwrap(), Some(patched));
    }

    #[tokio::test]
    async fn patch_of_missing_record_fails() {
        let store = store_with(MemoryDocumentStore::new());
        let err = store
            .patch("ghost", Patch::new().set("priority", 1), at(2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn update_preserves_created_at() {
        let store = store_with(MemoryDocumentStore::new());
        store.create(&task("a", 1)).await.unwrap();

        let mut replacement = task("a", 3);
        replacement.created_at = at(20);
        let updated = store.update("a", &replacement, at(6)).await.unwrap();

        assert_eq!(updated.created_at, at(1));
        assert_eq!(updated.updated_at, at(6));
        assert_eq!(updated.priority, 3);

        let err = store.update("ghost", &task("ghost", 1), at(6)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { user_facing: false, .. }));
    }

    #[tokio::test]
    async fn writes_invalidate_cached_pages() {
        let store = store_with(MemoryDocumentStore::new());
        store.create(&task("a", 1)).await.unwrap();

        let query = Query::new().filter("priority", FilterOperator::Gte, 1);
        assert_eq!(store.query(&query).await.unwrap().len(), 1);
        assert_eq!(store.query(&query).await.unwrap().len(), 1);

        store.create(&task("b", 2)).await.unwrap();
        assert_eq!(store.query(&query).await.unwrap().len(), 2);

        store.remove("a").await.unwrap();
        let ids: Vec<String> = store
            .query(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, ["b"]);
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn raw_reads_bypass_codec() {
        let store = store_with(MemoryDocumentStore::new());
        store.create(&task("a", 1)).await.unwrap();

        let raw = store.raw_get("a").await.unwrap().unwrap();
        assert_eq!(raw.get("id"), Some(&Value::String("a".into())));
        assert!(matches!(raw.get("createdAt"), Some(Value::Timestamp(_))));
        assert!(store.exists("a").await.unwrap());
        assert!(!store.exists("b").await.unwrap());

        let rows = store.raw_query(&Query::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn remove_by_query_returns_ids_in_query_order() {
        let store = store_with(MemoryDocumentStore::new());
        for (id, priority) in [("a", 3), ("b", 1), ("c", 2), ("d", 9)] {
            store.create(&task(id, priority)).await.unwrap();
        }

        let query = Query::new()
            .filter("priority", FilterOperator::Lt, 5)
            .sort(Sort::desc("priority"));
        let removed = store.remove_by_query(&query, false, None).await.unwrap();
        assert_eq!(removed, ["a", "c", "b"]);

        let left = store.query(&Query::new()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "d");
    }

    #[tokio::test]
    async fn remove_by_query_rejects_zero_page_size() {
        let store = store_with(MemoryDocumentStore::new());
        let err = store
            .remove_by_query(&Query::new(), true, Some(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn uncached_store_always_reads_storage() {
        let documents = MemoryDocumentStore::new();
        let store: RecordStore<Task> = RecordStore::builder("tasks")
            .store(Arc::new(documents.clone()))
            .json_codec()
            .build()
            .unwrap();

        store.create(&task("a", 1)).await.unwrap();
        documents.set_offline(true);
        assert!(matches!(
            store.get("a").await,
            Err(StoreError::StorageUnavailable(_))
        ));
    }
}
