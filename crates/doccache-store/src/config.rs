//! Settings for a cached record store.
//!
//! Mirrors the sections of `config/default.toml`; every field has a default,
//! so a partial (or empty) file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::guarded_cache::{DEFAULT_TOMBSTONE_TTL, DEFAULT_VALUE_TTL};
use crate::record_store::DEFAULT_REMOVE_PAGE_SIZE;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub store: StorageSection,
    pub cache: CacheSection,
    pub remove: RemoveSection,
    pub log: LogSection,
}

/// `[store]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/doccache.db"),
        }
    }
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    pub max_capacity: u64,
    /// Lifetime of cached records and pages.
    pub ttl_seconds: u64,
    /// Lifetime of guard markers; raised to `ttl_seconds` when shorter.
    pub tombstone_ttl_seconds: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 10_000,
            ttl_seconds: DEFAULT_VALUE_TTL.as_secs(),
            tombstone_ttl_seconds: DEFAULT_TOMBSTONE_TTL.as_secs(),
        }
    }
}

/// `[remove]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoveSection {
    pub page_size: usize,
}

impl Default for RemoveSection {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_REMOVE_PAGE_SIZE,
        }
    }
}

/// `[log]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
