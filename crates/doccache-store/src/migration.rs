//! Schema of the SQLite document store.
//!
//! Steps are applied in version order, each inside its own transaction, and
//! recorded in `schema_versions`; re-running is a no-op once the newest
//! version is recorded.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

struct Step {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

impl Step {
    fn failed(&self, stage: &str, err: rusqlite::Error) -> StoreError {
        StoreError::Migration {
            version: self.version,
            message: format!("{stage}: {err}"),
        }
    }
}

static STEPS: &[Step] = &[
    Step {
        version: 1,
        description: "documents keyed by (collection, id)",
        sql: "CREATE TABLE documents (
                  collection  TEXT    NOT NULL,
                  id          TEXT    NOT NULL,
                  body        TEXT    NOT NULL,
                  create_time INTEGER NOT NULL,
                  update_time INTEGER NOT NULL,
                  PRIMARY KEY (collection, id)
              );",
    },
    Step {
        version: 2,
        description: "update_time index for clock recovery",
        sql: "CREATE INDEX idx_documents_update_time ON documents(update_time);",
    },
];

/// Bring `conn` up to the newest schema version. Blocking.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
             version     INTEGER PRIMARY KEY,
             description TEXT    NOT NULL,
             applied_at  TEXT    NOT NULL
         );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("create schema_versions: {e}"),
    })?;

    let current = current_version(conn)?;
    let mut applied = 0;
    for step in STEPS.iter().filter(|s| s.version > current) {
        apply(conn, step)?;
        applied += 1;
    }

    if applied == 0 {
        debug!(version = current, "schema up to date");
    } else {
        info!(from = current, applied, "schema migrated");
    }
    Ok(())
}

/// Newest recorded schema version, 0 on a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_versions",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("read schema version: {e}"),
    })
}

fn apply(conn: &Connection, step: &Step) -> StoreResult<()> {
    // Dropping the transaction without commit rolls it back.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| step.failed("begin", e))?;
    tx.execute_batch(step.sql)
        .map_err(|e| step.failed("execute", e))?;
    tx.execute(
        "INSERT INTO schema_versions (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![step.version, step.description, chrono::Utc::now().to_rfc3339()],
    )
    .map_err(|e| step.failed("record", e))?;
    tx.commit().map_err(|e| step.failed("commit", e))?;

    info!(version = step.version, description = step.description, "schema step applied");
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────
