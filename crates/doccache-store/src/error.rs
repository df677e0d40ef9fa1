//! Error types for the doccache-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! Uses `thiserror` for ergonomic, zero-cost error definitions.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the data-access layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An operation was attempted before the store was fully set up.
    #[error("record store not configured: {0}")]
    NotConfigured(String),

    /// A record failed validation or is missing a required date field.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The backing store reported a primary-key conflict on create.
    #[error("already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    /// The requested record was not found.
    ///
    /// `user_facing` decides whether the failure is reported to clients as a
    /// plain "not found" or treated as an internal error.
    #[error("{collection} not found: {id}")]
    NotFound {
        collection: String,
        id: String,
        user_facing: bool,
    },

    /// The query description is malformed (conflicting cursors, cursor
    /// without sort, operand of the wrong shape).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The backing document store failed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The cache backend failed.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Converting between a record and its storage document failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl StoreError {
    /// HTTP-style status code classifying this error for callers that
    /// surface it over an API.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationFailed(_) | Self::InvalidQuery(_) => 400,
            Self::NotFound {
                user_facing: true, ..
            } => 404,
            Self::AlreadyExists { .. } => 409,
            _ => 500,
        }
    }

    /// Whether the error came from one of the external collaborators rather
    /// than from the caller's input.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_)
                | Self::CacheUnavailable(_)
                | Self::Sqlite(_)
                | Self::TaskJoin(_)
        )
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
