//! Records and their storage codecs.
//!
//! A [`Record`] is whatever the application keeps in a collection. The
//! [`RecordCodec`] passed to a [`RecordStore`](crate::RecordStore) at setup
//! converts records to storage documents and back; [`JsonCodec`] covers any
//! record that round-trips through `serde`.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::{StoreError, StoreResult};
use crate::value::{Document, Value, promote_timestamps_at, timestamps_to_strings};

/// Field holding the document id inside every stored document.
pub const ID_FIELD: &str = "id";
/// Field holding the creation instant.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Field holding the last-modification instant.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Fields stored as native timestamps unless a codec names others.
pub const DEFAULT_TIMESTAMP_FIELDS: &[&str] = &[CREATED_AT_FIELD, UPDATED_AT_FIELD];

/// A record rejected by its own validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        Self::ValidationFailed(err.0)
    }
}

/// An application entity stored in a collection.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Check the record before it is written. Defaults to accepting
    /// everything with a non-empty id.
    fn validate(&self) -> Result<(), ValidationError> {
        if self.id().is_empty() {
            return Err(ValidationError::new("id must not be empty"));
        }
        Ok(())
    }
}

/// Converts records to storage documents and back.
pub trait RecordCodec<T>: Send + Sync {
    fn to_storage(&self, record: &T) -> StoreResult<Document>;

    /// Rebuild a record from the stored document of `id`.
    fn from_storage(&self, id: &str, doc: Document) -> StoreResult<T>;
}

/// [`RecordCodec`] for `serde` records.
///
/// RFC 3339 strings at the codec's timestamp paths (dotted, default
/// `createdAt` and `updatedAt`) are stored as native timestamps and turn back
/// into strings on the way out. Every other string is stored verbatim.
pub struct JsonCodec<T> {
    timestamp_fields: Vec<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            timestamp_fields: DEFAULT_TIMESTAMP_FIELDS.iter().map(|f| f.to_string()).collect(),
            _marker: PhantomData,
        }
    }

    /// Replace the timestamp paths.
    pub fn with_timestamp_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.timestamp_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn timestamp_fields(&self) -> &[String] {
        &self.timestamp_fields
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecordCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_storage(&self, record: &T) -> StoreResult<Document> {
        let json = serde_json::to_value(record)?;
        match Value::from_json(json) {
            Value::Map(mut doc) => {
                promote_timestamps_at(&mut doc, &self.timestamp_fields);
                Ok(doc)
            }
            other => Err(StoreError::Codec(format!(
                "record must serialize to an object, got {other:?}"
            ))),
        }
    }

    fn from_storage(&self, id: &str, mut doc: Document) -> StoreResult<T> {
        doc.entry(ID_FIELD.to_string())
            .or_insert_with(|| Value::String(id.to_string()));
        let json = timestamps_to_strings(Value::Map(doc)).into_json();
        serde_json::from_value(json)
            .map_err(|e| StoreError::Codec(format!("cannot decode {id}: {e}")))
    }
}

/// Require `field` of `doc` to be a native timestamp.
pub(crate) fn require_timestamp(doc: &Document, field: &str) -> StoreResult<()> {
    match doc.get(field) {
        Some(Value::Timestamp(_)) => Ok(()),
        _ => Err(StoreError::ValidationFailed(format!(
            "{field} must be a timestamp"
        ))),
    }
}
