//! Partial updates with deep-merge semantics.
//!
//! A [`Patch`] is a set of leaf writes addressed by dotted field paths.
//! Nested objects given to [`Patch::from_value`] are flattened, so siblings of
//! a patched leaf are left alone; arrays are leaves and replace wholesale.
//! [`Patch::remove`] is the explicit "delete this field" sentinel.

use std::collections::BTreeMap;

use crate::error::{StoreError, StoreResult};
use crate::record::DEFAULT_TIMESTAMP_FIELDS;
use crate::value::{Document, Value, promote_timestamps_at};

/// What to do with a single field path.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Set(Value),
    Remove,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: BTreeMap<String, PatchOp>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the leaf at `path` (dotted for nested fields).
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.insert(path.into(), PatchOp::Set(value.into()));
        self
    }

    /// Remove the leaf at `path`, leaving its siblings untouched.
    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.ops.insert(path.into(), PatchOp::Remove);
        self
    }

    /// Flatten a map value into leaf writes.
    pub fn from_value(value: Value) -> StoreResult<Self> {
        let Value::Map(map) = value else {
            return Err(StoreError::ValidationFailed(
                "patch must be an object".into(),
            ));
        };
        let mut patch = Self::new();
        flatten_into(&mut patch.ops, None, map);
        Ok(patch)
    }

    /// Flatten a JSON object into leaf writes. RFC 3339 strings under
    /// `createdAt` and `updatedAt` become timestamps.
    pub fn from_json(json: serde_json::Value) -> StoreResult<Self> {
        Self::from_json_with(json, DEFAULT_TIMESTAMP_FIELDS)
    }

    /// Like [`from_json`](Self::from_json), promoting strings under
    /// `timestamp_fields` (dotted paths) instead.
    pub fn from_json_with<S: AsRef<str>>(json: serde_json::Value, timestamp_fields: &[S]) -> StoreResult<Self> {
        let mut value = Value::from_json(json);
        if let Value::Map(doc) = &mut value {
            promote_timestamps_at(doc, timestamp_fields);
        }
        Self::from_value(value)
    }

    /// Drop every op addressing `field` or anything nested below it.
    pub fn without(mut self, field: &str) -> Self {
        let nested = format!("{field}.");
        self.ops
            .retain(|path, _| path != field && !path.starts_with(&nested));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PatchOp)> {
        self.ops.iter()
    }

    /// Deep-merge this patch into `doc`.
    ///
    /// Missing intermediate maps are created; a non-map intermediate value is
    /// replaced by a map, matching what the store does for dotted updates.
    pub fn apply_to(&self, doc: &mut Document) {
        for (path, op) in &self.ops {
            let segments: Vec<&str> = path.split('.').collect();
            apply_op(doc, &segments, op);
        }
    }
}

fn flatten_into(ops: &mut BTreeMap<String, PatchOp>, prefix: Option<&str>, map: BTreeMap<String, Value>) {
    for (key, value) in map {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key,
        };
        match value {
            Value::Map(nested) if !nested.is_empty() => flatten_into(ops, Some(&path), nested),
            leaf => {
                ops.insert(path, PatchOp::Set(leaf));
            }
        }
    }
}

fn apply_op(doc: &mut Document, segments: &[&str], op: &PatchOp) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = doc;
    for segment in parents {
        if matches!(op, PatchOp::Remove) && !matches!(current.get(*segment), Some(Value::Map(_))) {
            return;
        }
        let slot = current
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        if !matches!(slot, Value::Map(_)) {
            *slot = Value::Map(BTreeMap::new());
        }
        let Value::Map(next) = slot else {
            return;
        };
        current = next;
    }

    match op {
        PatchOp::Set(value) => {
            current.insert((*last).to_string(), value.clone());
        }
        PatchOp::Remove => {
            current.remove(*last);
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
