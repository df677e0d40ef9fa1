//! # doccache-store
//!
//! Cached data-access layer in front of a document store.
//!
//! Writes go to storage first; the storage timestamp of each write then
//! guards the cache update, so two racing writers always leave the cache
//! holding whatever the store applied last. Queries are planned by a cursor
//! paginator that can serve "the N records right before X" with a bounded,
//! reversed scan.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │  RecordStore<T>   (CRUD, query, removeByQuery) │
//! ├──────────────────────────┬─────────────────────┤
//! │  TimestampGuardedCache   │  CursorPaginator    │
//! │  CacheBackend (moka)     │  scan evaluator     │
//! ├──────────────────────────┴─────────────────────┤
//! │  DocumentStore: MemoryDocumentStore (dashmap)  │
//! │                 SqliteDocumentStore (rusqlite) │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use doccache_store::{MokaCacheBackend, RecordStore, SqliteDocumentStore};
//!
//! let documents = SqliteDocumentStore::open("data/doccache.db").await?;
//! let users: RecordStore<User> = RecordStore::builder("users")
//!     .store(Arc::new(documents))
//!     .json_codec()
//!     .cache_backend(Arc::new(MokaCacheBackend::builder("users").build()))
//!     .build()?;
//!
//! users.create(&user).await?;
//! let page = users.query(&Query::new().sort(Sort::asc("createdAt")).limit(10)).await?;
//! ```

pub mod cache;
pub mod config;
pub mod db;
pub mod document_store;
pub mod error;
pub mod guarded_cache;
pub mod memory_store;
pub mod migration;
pub mod paginator;
pub mod patch;
pub mod query;
pub mod record;
pub mod record_store;
pub mod scan;
pub mod sqlite_store;
pub mod timestamp;
pub mod value;

// ── re-exports ───────────────────────────────────────────────────────

pub use cache::{
    CacheBackend, CacheEntry, CacheStats, GuardedWrite, MokaCacheBackend, MokaCacheBackendBuilder,
    NullCacheBackend, SharedCacheBackend,
};
pub use config::StoreConfig;
pub use db::Database;
pub use document_store::{DocumentStore, ScanResult, Snapshot};
pub use error::{StoreError, StoreResult};
pub use guarded_cache::TimestampGuardedCache;
pub use memory_store::MemoryDocumentStore;
pub use paginator::{CursorPaginator, ScanPlan, ScanRequest};
pub use patch::{Patch, PatchOp};
pub use query::{Filter, FilterOperator, Query, QueryCacheKey, Sort, SortDirection};
pub use record::{DEFAULT_TIMESTAMP_FIELDS, JsonCodec, Record, RecordCodec, ValidationError};
pub use record_store::{RecordStore, RecordStoreBuilder};
pub use sqlite_store::SqliteDocumentStore;
pub use timestamp::{StorageClock, StorageTimestamp};
pub use value::{Document, Value, map_leaves};
