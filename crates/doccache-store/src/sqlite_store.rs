//! Document store persisted in SQLite.
//!
//! Each document is one row of the `documents` table, keyed by
//! `(collection, id)`, with the body stored as the JSON encoding of its
//! [`Document`] tree and both write times kept as microsecond counts.
//! Timestamps are drawn while the connection mutex is held, so the order of
//! timestamps matches the order writes hit the database.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::{debug, info};

use crate::db::Database;
use crate::document_store::{DocumentStore, ScanResult, Snapshot};
use crate::error::{StoreError, StoreResult};
use crate::paginator::ScanRequest;
use crate::patch::Patch;
use crate::scan;
use crate::timestamp::{StorageClock, StorageTimestamp};
use crate::value::Document;

#[derive(Clone)]
pub struct SqliteDocumentStore {
    db: Database,
    clock: Arc<StorageClock>,
}

impl SqliteDocumentStore {
    /// Open (or create) the database at `path` and run pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Database::open_and_migrate(path).await?;
        Self::with_database(db).await
    }

    /// In-memory store, mostly for tests.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let db = Database::open_in_memory()?;
        db.run_migrations().await?;
        Self::with_database(db).await
    }

    /// Wrap an already migrated database.
    pub async fn with_database(db: Database) -> StoreResult<Self> {
        let latest: Option<i64> = db
            .execute(|conn| {
                Ok(conn.query_row("SELECT MAX(update_time) FROM documents", [], |row| row.get(0))?)
            })
            .await?;

        let clock = StorageClock::new();
        if let Some(micros) = latest {
            clock.observe(StorageTimestamp::from_micros(micros));
        }
        info!(latest = ?latest, "sqlite document store ready");

        Ok(Self {
            db,
            clock: Arc::new(clock),
        })
    }

    /// Number of documents stored in `collection`.
    pub async fn count(&self, collection: &str) -> StoreResult<u64> {
        let collection = collection.to_string();
        self.db
            .execute(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT count(*) FROM documents WHERE collection = ?1",
                    params![collection],
                    |row| row.get(0),
                )?;
                Ok(n as u64)
            })
            .await
    }
}

fn encode(doc: &Document) -> StoreResult<String> {
    Ok(serde_json::to_string(doc)?)
}

fn decode(body: &str) -> StoreResult<Document> {
    Ok(serde_json::from_str(body)?)
}

fn load_body(conn: &Connection, collection: &str, id: &str) -> StoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?)
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create(&self, collection: &str, id: &str, doc: Document) -> StoreResult<StorageTimestamp> {
        let body = encode(&doc)?;
        let (collection, id) = (collection.to_string(), id.to_string());
        let clock = Arc::clone(&self.clock);

        self.db
            .execute(move |conn| {
                let ts = clock.tick();
                let inserted = conn.execute(
                    "INSERT INTO documents (collection, id, body, create_time, update_time)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![collection, id, body, ts.as_micros()],
                );
                match inserted {
                    Ok(_) => {
                        debug!(collection, id, %ts, "document created");
                        Ok(ts)
                    }
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == ErrorCode::ConstraintViolation =>
                    {
                        Err(StoreError::AlreadyExists { collection, id })
                    }
                    Err(err) => Err(err.into()),
                }
            })
            .await
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Snapshot> {
        let (collection, id) = (collection.to_string(), id.to_string());
        let clock = Arc::clone(&self.clock);

        let (row, read_time, id) = self
            .db
            .execute(move |conn| {
                let row: Option<(String, i64, i64)> = conn
                    .query_row(
                        "SELECT body, create_time, update_time FROM documents
                         WHERE collection = ?1 AND id = ?2",
                        params![collection, id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;
                Ok((row, clock.tick(), id))
            })
            .await?;

        match row {
            Some((body, created, updated)) => Ok(Snapshot {
                id,
                document: Some(decode(&body)?),
                create_time: Some(StorageTimestamp::from_micros(created)),
                update_time: Some(StorageTimestamp::from_micros(updated)),
                read_time,
            }),
            None => Ok(Snapshot {
                id,
                document: None,
                create_time: None,
                update_time: None,
                read_time,
            }),
        }
    }

    async fn set(&self, collection: &str, id: &str, doc: Document) -> StoreResult<StorageTimestamp> {
        let body = encode(&doc)?;
        let (collection, id) = (collection.to_string(), id.to_string());
        let clock = Arc::clone(&self.clock);

        self.db
            .execute(move |conn| {
                let ts = clock.tick();
                conn.execute(
                    "INSERT INTO documents (collection, id, body, create_time, update_time)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT (collection, id)
                     DO UPDATE SET body = excluded.body, update_time = excluded.update_time",
                    params![collection, id, body, ts.as_micros()],
                )?;
                debug!(collection, id, %ts, "document set");
                Ok(ts)
            })
            .await
    }

    async fn update(&self, collection: &str, id: &str, patch: &Patch) -> StoreResult<StorageTimestamp> {
        let patch = patch.clone();
        let (collection, id) = (collection.to_string(), id.to_string());
        let clock = Arc::clone(&self.clock);

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let Some(body) = load_body(&tx, &collection, &id)? else {
                    return Err(StoreError::NotFound {
                        collection,
                        id,
                        user_facing: false,
                    });
                };

                let mut doc = decode(&body)?;
                patch.apply_to(&mut doc);

                let ts = clock.tick();
                tx.execute(
                    "UPDATE documents SET body = ?3, update_time = ?4
                     WHERE collection = ?1 AND id = ?2",
                    params![collection, id, encode(&doc)?, ts.as_micros()],
                )?;
                tx.commit()?;

                debug!(collection, id, ops = patch.len(), %ts, "document updated");
                Ok(ts)
            })
            .await
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<StorageTimestamp> {
        let (collection, id) = (collection.to_string(), id.to_string());
        let clock = Arc::clone(&self.clock);

        self.db
            .execute(move |conn| {
                let ts = clock.tick();
                let removed = conn.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                )?;
                debug!(collection, id, removed, %ts, "document deleted");
                Ok(ts)
            })
            .await
    }

    async fn query(&self, collection: &str, request: &ScanRequest) -> StoreResult<ScanResult> {
        let collection = collection.to_string();
        let clock = Arc::clone(&self.clock);

        let (rows, read_time) = self
            .db
            .execute(move |conn| {
                let mut stmt =
                    conn.prepare_cached("SELECT id, body FROM documents WHERE collection = ?1")?;
                let rows = stmt
                    .query_map(params![collection], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((rows, clock.tick()))
            })
            .await?;

        let documents = rows
            .into_iter()
            .map(|(id, body)| Ok((id, decode(&body)?)))
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(ScanResult {
            documents: scan::execute(documents, request),
            read_time,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
