//! Document store contract.
//!
//! The backing store is an external collaborator: every write reports the
//! [`StorageTimestamp`] it was applied at, every read reports the timestamp it
//! observed. [`MemoryDocumentStore`](crate::MemoryDocumentStore) and
//! [`SqliteDocumentStore`](crate::SqliteDocumentStore) are the bundled
//! implementations.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::paginator::ScanRequest;
use crate::patch::Patch;
use crate::timestamp::StorageTimestamp;
use crate::value::Document;

/// Result of reading a single document.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub document: Option<Document>,
    pub create_time: Option<StorageTimestamp>,
    pub update_time: Option<StorageTimestamp>,
    pub read_time: StorageTimestamp,
}

impl Snapshot {
    pub fn exists(&self) -> bool {
        self.document.is_some()
    }

    /// The timestamp a cache write derived from this read must carry: the
    /// last write that produced the document, or the read time when absent.
    pub fn version(&self) -> StorageTimestamp {
        self.update_time
            .or(self.create_time)
            .unwrap_or(self.read_time)
    }
}

/// Ordered rows answering a [`ScanRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    pub documents: Vec<(String, Document)>,
    pub read_time: StorageTimestamp,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. Fails with
    /// [`StoreError::AlreadyExists`](crate::StoreError::AlreadyExists) on a
    /// primary-key conflict.
    async fn create(&self, collection: &str, id: &str, doc: Document) -> StoreResult<StorageTimestamp>;

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Snapshot>;

    /// Create or fully overwrite a document.
    async fn set(&self, collection: &str, id: &str, doc: Document) -> StoreResult<StorageTimestamp>;

    /// Deep-merge `patch` into an existing document. Fails with
    /// [`StoreError::NotFound`](crate::StoreError::NotFound) when absent.
    async fn update(&self, collection: &str, id: &str, patch: &Patch) -> StoreResult<StorageTimestamp>;

    /// Delete a document; deleting an absent document still succeeds.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<StorageTimestamp>;

    async fn query(&self, collection: &str, request: &ScanRequest) -> StoreResult<ScanResult>;
}
