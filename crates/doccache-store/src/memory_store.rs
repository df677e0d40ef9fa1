//! In-process document store.
//!
//! Collections live in a [`DashMap`] keyed by collection name; each write
//! takes the collection's shard lock, draws its timestamp from the shared
//! [`StorageClock`] while holding it, and therefore timestamps writes to the
//! same collection in the order they were applied.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::document_store::{DocumentStore, ScanResult, Snapshot};
use crate::error::{StoreError, StoreResult};
use crate::paginator::ScanRequest;
use crate::patch::Patch;
use crate::scan;
use crate::timestamp::{StorageClock, StorageTimestamp};
use crate::value::Document;

#[derive(Debug, Clone)]
struct StoredDocument {
    document: Document,
    create_time: StorageTimestamp,
    update_time: StorageTimestamp,
}

/// Thread-safe, cloneable in-memory [`DocumentStore`].
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<DashMap<String, HashMap<String, StoredDocument>>>,
    clock: Arc<StorageClock>,
    offline: Arc<AtomicBool>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable: every call fails with
    /// [`StoreError::StorageUnavailable`] until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of documents currently held in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|shard| shard.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::StorageUnavailable(
                "memory store is offline".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, collection: &str, id: &str, doc: Document) -> StoreResult<StorageTimestamp> {
        self.ensure_online()?;
        let mut shard = self.collections.entry(collection.to_string()).or_default();
        match shard.entry(id.to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
            Entry::Vacant(slot) => {
                let ts = self.clock.tick();
                slot.insert(StoredDocument {
                    document: doc,
                    create_time: ts,
                    update_time: ts,
                });
                debug!(collection, id, %ts, "document created");
                Ok(ts)
            }
        }
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Snapshot> {
        self.ensure_online()?;
        let stored = self
            .collections
            .get(collection)
            .and_then(|shard| shard.get(id).cloned());
        let read_time = self.clock.tick();

        Ok(match stored {
            Some(stored) => Snapshot {
                id: id.to_string(),
                document: Some(stored.document),
                create_time: Some(stored.create_time),
                update_time: Some(stored.update_time),
                read_time,
            },
            None => Snapshot {
                id: id.to_string(),
                document: None,
                create_time: None,
                update_time: None,
                read_time,
            },
        })
    }

    async fn set(&self, collection: &str, id: &str, doc: Document) -> StoreResult<StorageTimestamp> {
        self.ensure_online()?;
        let mut shard = self.collections.entry(collection.to_string()).or_default();
        let ts = self.clock.tick();
        let create_time = shard.get(id).map(|s| s.create_time).unwrap_or(ts);
        shard.insert(
            id.to_string(),
            StoredDocument {
                document: doc,
                create_time,
                update_time: ts,
            },
        );
        debug!(collection, id, %ts, "document set");
        Ok(ts)
    }

    async fn update(&self, collection: &str, id: &str, patch: &Patch) -> StoreResult<StorageTimestamp> {
        self.ensure_online()?;
        let mut shard = self.collections.entry(collection.to_string()).or_default();
        let Some(stored) = shard.get_mut(id) else {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
                user_facing: false,
            });
        };
        let ts = self.clock.tick();
        patch.apply_to(&mut stored.document);
        stored.update_time = ts;
        debug!(collection, id, ops = patch.len(), %ts, "document updated");
        Ok(ts)
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<StorageTimestamp> {
        self.ensure_online()?;
        let mut shard = self.collections.entry(collection.to_string()).or_default();
        let ts = self.clock.tick();
        shard.remove(id);
        debug!(collection, id, %ts, "document deleted");
        Ok(ts)
    }

    async fn query(&self, collection: &str, request: &ScanRequest) -> StoreResult<ScanResult> {
        self.ensure_online()?;
        let (documents, read_time) = match self.collections.get(collection) {
            Some(shard) => {
                let rows: Vec<(String, Document)> = shard
                    .iter()
                    .map(|(id, stored)| (id.clone(), stored.document.clone()))
                    .collect();
                (rows, self.clock.tick())
            }
            None => (Vec::new(), self.clock.tick()),
        };

        Ok(ScanResult {
            documents: scan::execute(documents, request),
            read_time,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Sort;
    use crate::value::Value;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        match Value::from_json(json) {
            Value::Map(map) => map,
            other => panic!("expected a map, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_conflicts_on_existing_id() {
        let store = MemoryDocumentStore::new();
        store.create("c", "a", doc(json!({"n": 1}))).await.unwrap();
        let err = store.create("c", "a", doc(json!({"n": 2}))).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        let snapshot = store.get("c", "a").await.unwrap();
        assert_eq!(snapshot.document.unwrap().get("n"), Some(&Value::Integer(1)));
    }

    #[tokio::test]
    async fn writes_receive_increasing_timestamps() {
        let store = MemoryDocumentStore::new();
        let t1 = store.create("c", "a", doc(json!({"n": 1}))).await.unwrap();
        let t2 = store.set("c", "a", doc(json!({"n": 2}))).await.unwrap();
        let t3 = store
            .update("c", "a", &Patch::new().set("n", 3))
            .await
            .unwrap();
        let t4 = store.delete("c", "a").await.unwrap();
        assert!(t1 < t2 && t2 < t3 && t3 < t4);
    }

    #[tokio::test]
    async fn get_reports_versions() {
        let store = MemoryDocumentStore::new();
        let created = store.create("c", "a", doc(json!({"n": 1}))).await.unwrap();
        let updated = store.set("c", "a", doc(json!({"n": 2}))).await.unwrap();

        let snapshot = store.get("c", "a").await.unwrap();
        assert_eq!(snapshot.create_time, Some(created));
        assert_eq!(snapshot.update_time, Some(updated));
        assert_eq!(snapshot.version(), updated);
        assert!(snapshot.read_time > updated);

        let missing = store.get("c", "zzz").await.unwrap();
        assert!(!missing.exists());
        assert_eq!(missing.version(), missing.read_time);
    }

    #[tokio::test]
    async fn update_requires_existing_document() {
        let store = MemoryDocumentStore::new();
        let err = store
            .update("c", "ghost", &Patch::new().set("n", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_of_absent_document_succeeds() {
        let store = MemoryDocumentStore::new();
        store.delete("c", "nothing").await.unwrap();
        assert!(store.is_empty("c"));
    }

    #[tokio::test]
    async fn query_orders_and_limits() {
        let store = MemoryDocumentStore::new();
        for (id, n) in [("a", 3), ("b", 1), ("c", 2)] {
            store.create("c", id, doc(json!({"n": n}))).await.unwrap();
        }
        let request = ScanRequest {
            order: Some(Sort::asc("n")),
            limit: Some(2),
            ..Default::default()
        };
        let result = store.query("c", &request).await.unwrap();
        let ids: Vec<&str> = result.documents.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);

        let empty = store.query("other", &request).await.unwrap();
        assert!(empty.documents.is_empty());
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryDocumentStore::new();
        store.set_offline(true);
        let err = store.get("c", "a").await.unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
        store.set_offline(false);
        assert!(store.get("c", "a").await.is_ok());
    }
}
