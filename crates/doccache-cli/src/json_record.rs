//! Schemaless JSON record handled by the CLI.

use chrono::{DateTime, SecondsFormat, Utc};
use doccache_store::{Record, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Any JSON object with a string `id`. Dates travel as RFC 3339 strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl JsonRecord {
    /// Build a record from a JSON object. A missing `id` becomes a fresh
    /// UUID v7; missing `createdAt`/`updatedAt` become `now`.
    pub fn stamped(mut object: Map<String, Value>, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        let id = match object.remove("id") {
            Some(Value::String(id)) => id,
            Some(other) => {
                return Err(ValidationError::new(format!("id must be a string, got {other}")));
            }
            None => Uuid::now_v7().to_string(),
        };

        let now = Value::String(now.to_rfc3339_opts(SecondsFormat::AutoSi, true));
        object
            .entry("createdAt")
            .or_insert_with(|| now.clone());
        object.entry("updatedAt").or_insert(now);

        Ok(Self { id, fields: object })
    }

    /// Build a record for an overwrite of `id`: identity comes from the
    /// argument, not the payload.
    pub fn replacing(id: &str, mut object: Map<String, Value>) -> Self {
        object.remove("id");
        Self {
            id: id.to_string(),
            fields: object,
        }
    }
}

impl Record for JsonRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::new("id must not be empty"));
        }
        if self.id.contains('/') {
            return Err(ValidationError::new("id must not contain '/'"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn stamped_fills_identity_and_dates() {
        let now = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        let record = JsonRecord::stamped(object(json!({"name": "a"})), now).unwrap();

        assert!(Uuid::parse_str(&record.id).is_ok());
        assert_eq!(record.fields["createdAt"], json!("2019-01-01T00:00:00Z"));
        assert_eq!(record.fields["updatedAt"], json!("2019-01-01T00:00:00Z"));
        assert!(record.validate().is_ok());
    }

    #[test]
    fn stamped_keeps_given_values() {
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let record = JsonRecord::stamped(
            object(json!({"id": "x", "createdAt": "2019-01-01T00:00:00Z"})),
            now,
        )
        .unwrap();
        assert_eq!(record.id, "x");
        assert_eq!(record.fields["createdAt"], json!("2019-01-01T00:00:00Z"));
        assert_eq!(record.fields["updatedAt"], json!("2020-01-01T00:00:00Z"));
    }

    #[test]
    fn non_string_id_is_rejected() {
        let err = JsonRecord::stamped(object(json!({"id": 7})), Utc::now()).unwrap_err();
        assert!(err.to_string().contains("id must be a string"));
    }

    #[test]
    fn serializes_flat() {
        let record = JsonRecord::replacing("x", object(json!({"id": "ignored", "n": 1})));
        assert_eq!(serde_json::to_value(&record).unwrap(), json!({"id": "x", "n": 1}));
    }
}
