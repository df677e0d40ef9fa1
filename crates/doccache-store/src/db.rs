//! Shared SQLite connection for the document store.
//!
//! [`Database`] owns one `rusqlite::Connection` behind a mutex and runs every
//! closure on tokio's blocking pool. Holding the mutex for the whole closure
//! serializes statements, which the SQLite document store relies on to hand
//! out write timestamps in commit order.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<Arc<PathBuf>>,
}

impl Database {
    /// Open (or create) the database file at `path`. Blocking.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        configure(&conn)?;
        info!(path = %path.display(), "database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(Arc::new(path)),
        })
    }

    /// Private in-memory database; gone once the last clone drops.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        debug!("in-memory database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Open `path` off the async runtime and migrate it to the newest schema.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let db = tokio::task::spawn_blocking(move || Self::open(path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(migration::run_all).await
    }

    /// Backing file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    /// Run `f` with the connection on the blocking pool.
    ///
    /// ```ignore
    /// let n: i64 = db
    ///     .execute(|conn| Ok(conn.query_row("SELECT count(*) FROM documents", [], |r| r.get(0))?))
    ///     .await?;
    /// ```
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            f(&*guard)
        })
        .await?
    }

    /// Like [`execute`](Self::execute), with a mutable connection for
    /// `Connection::transaction`.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut *guard)
        })
        .await?
    }
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StoreError::TaskJoin("database mutex poisoned".into()))
}

fn configure(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    // 256 MiB
    conn.pragma_update(None, "mmap_size", 268_435_456_i64)?;
    conn.pragma_update(None, "busy_timeout", 5_000_i32)?;
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────
