//! Document value model.
//!
//! A [`Value`] is the tree stored by the document store: scalars, native
//! timestamps, arrays and string-keyed maps. Maps are `BTreeMap`s so any two
//! equal trees serialize identically, which the query cache key relies on.
//!
//! Values carry the store's cross-type total order:
//! `null < bool < number < timestamp < string < array < map`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A stored document: field name → value.
pub type Document = BTreeMap<String, Value>;

/// A node of a stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Rank of the value's type class in the cross-type order.
    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Integer(_) | Self::Double(_) => 2,
            Self::Timestamp(_) => 3,
            Self::String(_) => 4,
            Self::Array(_) => 5,
            Self::Map(_) => 6,
        }
    }

    /// Whether `self` and `other` belong to the same type class, so that a
    /// range comparison between them is meaningful.
    pub fn same_type_class(&self, other: &Value) -> bool {
        self.type_rank() == other.type_rank()
    }

    /// Total order across all values, following the store's rules.
    ///
    /// Integers and doubles compare numerically; NaN sorts below every other
    /// number.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Self::Map(a), Self::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => compare_numbers(a.as_f64(), b.as_f64()),
        }
    }

    /// Store equality: numerically equal integers and doubles are equal.
    pub fn store_eq(&self, other: &Value) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }

    fn as_f64(&self) -> f64 {
        match self {
            Self::Integer(i) => *i as f64,
            Self::Double(d) => *d,
            _ => f64::NAN,
        }
    }

    /// Look up a dotted field path (`"deep.thing1"`) inside a map value.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            match current {
                Self::Map(map) => current = map.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(at) => Some(*at),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    // ── JSON interop ─────────────────────────────────────────────────

    /// Convert a plain JSON tree. Strings stay strings; use
    /// [`map_leaves`] to promote them to timestamps.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert back into plain JSON. Timestamps become RFC 3339 strings in
    /// UTC (`Z` suffix), the format `chrono` itself serializes to.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(b),
            Self::Integer(i) => serde_json::Value::from(i),
            Self::Double(d) => serde_json::Number::from_f64(d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Timestamp(at) => {
                serde_json::Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Self::String(s) => serde_json::Value::String(s),
            Self::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Self::into_json).collect())
            }
            Self::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into_json())).collect(),
            ),
        }
    }
}

fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(at: DateTime<Utc>) -> Self {
        Self::Timestamp(at)
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(items: Vec<V>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

// ── tree mapping ─────────────────────────────────────────────────────

/// Rebuild `value`, replacing every leaf for which `predicate` holds with
/// `transform(leaf)`. Arrays and maps are traversed, never passed to the
/// predicate themselves.
pub fn map_leaves<P, F>(value: Value, predicate: &P, transform: &F) -> Value
where
    P: Fn(&Value) -> bool,
    F: Fn(Value) -> Value,
{
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| map_leaves(item, predicate, transform))
                .collect(),
        ),
        Value::Map(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, map_leaves(v, predicate, transform)))
                .collect(),
        ),
        leaf if predicate(&leaf) => transform(leaf),
        leaf => leaf,
    }
}

/// Parse an RFC 3339 string into a UTC instant.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// Promote every RFC 3339 string leaf to a native timestamp.
pub fn strings_to_timestamps(value: Value) -> Value {
    map_leaves(
        value,
        &|leaf| leaf.as_str().is_some_and(|s| parse_timestamp(s).is_some()),
        &|leaf| match leaf.as_str().and_then(parse_timestamp) {
            Some(at) => Value::Timestamp(at),
            None => leaf,
        },
    )
}

/// Promote RFC 3339 strings to timestamps only under the given dotted field
/// paths. Strings anywhere else keep their exact text.
pub fn promote_timestamps_at<S: AsRef<str>>(doc: &mut Document, paths: &[S]) {
    for path in paths {
        if let Some(slot) = path_mut(doc, path.as_ref()) {
            let leaf = std::mem::replace(slot, Value::Null);
            *slot = strings_to_timestamps(leaf);
        }
    }
}

fn path_mut<'a>(doc: &'a mut Document, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.');
    let mut current = doc.get_mut(segments.next()?)?;
    for segment in segments {
        let Value::Map(map) = current else {
            return None;
        };
        current = map.get_mut(segment)?;
    }
    Some(current)
}

/// Demote every native timestamp leaf to its RFC 3339 string.
pub fn timestamps_to_strings(value: Value) -> Value {
    map_leaves(
        value,
        &|leaf| matches!(leaf, Value::Timestamp(_)),
        &|leaf| match leaf {
            Value::Timestamp(at) => {
                Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            other => other,
        },
    )
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn day0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn cross_type_order() {
        let ordered = [
            Value::Null,
            Value::Bool(false),
            Value::Bool(true),
            Value::Integer(-3),
            Value::Double(2.5),
            Value::Integer(3),
            Value::Timestamp(day0()),
            Value::from("a"),
            Value::from("b"),
            Value::Array(vec![]),
            Value::Map(BTreeMap::new()),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(
                pair[0].total_cmp(&pair[1]),
                Ordering::Less,
                "{:?} should sort before {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn integers_and_doubles_compare_numerically() {
        assert!(Value::Integer(1).store_eq(&Value::Double(1.0)));
        assert!(!Value::Integer(1).store_eq(&Value::from("1")));
        assert!(Value::Integer(1).same_type_class(&Value::Double(9.5)));
    }

    #[test]
    fn get_path_walks_nested_maps() {
        let value = Value::from_json(json!({"deep": {"thing1": "1"}, "flat": 2}));
        assert_eq!(value.get_path("deep.thing1"), Some(&Value::from("1")));
        assert_eq!(value.get_path("flat"), Some(&Value::Integer(2)));
        assert_eq!(value.get_path("flat.nope"), None);
        assert_eq!(value.get_path("missing"), None);
    }

    #[test]
    fn map_leaves_converts_nested_dates() {
        let input = Value::from_json(json!({
            "id": "foo-id",
            "createdAt": "2019-01-01T00:00:00Z",
            "classy": [{"foo": "something", "at": "2019-01-01T00:00:00Z"}],
            "count": 3,
        }));

        let converted = strings_to_timestamps(input);

        assert_eq!(converted.get_path("id"), Some(&Value::from("foo-id")));
        assert_eq!(
            converted.get_path("createdAt"),
            Some(&Value::Timestamp(day0()))
        );
        let classy = converted.get_path("classy").and_then(Value::as_array).unwrap();
        assert_eq!(classy[0].get_path("at"), Some(&Value::Timestamp(day0())));
        assert_eq!(classy[0].get_path("foo"), Some(&Value::from("something")));
        assert_eq!(converted.get_path("count"), Some(&Value::Integer(3)));
    }

    #[test]
    fn promotion_is_limited_to_named_paths() {
        let Value::Map(mut doc) = Value::from_json(json!({
            "createdAt": "2019-01-01T00:00:00Z",
            "label": "2019-01-01T00:00:00+02:00",
            "meta": {"seenAt": "2019-01-01T00:00:00Z", "note": "2019-01-01T00:00:00Z"},
        })) else {
            panic!("expected a map");
        };

        promote_timestamps_at(&mut doc, &["createdAt", "meta.seenAt", "missing.path"]);

        assert_eq!(doc.get("createdAt"), Some(&Value::Timestamp(day0())));
        assert_eq!(doc.get("label"), Some(&Value::from("2019-01-01T00:00:00+02:00")));
        let meta = doc.get("meta").unwrap();
        assert_eq!(meta.get_path("seenAt"), Some(&Value::Timestamp(day0())));
        assert_eq!(meta.get_path("note"), Some(&Value::from("2019-01-01T00:00:00Z")));
    }

    #[test]
    fn timestamps_round_trip_through_json() {
        let original = json!({"createdAt": "2019-01-01T00:00:00Z", "tags": ["x"]});
        let stored = strings_to_timestamps(Value::from_json(original.clone()));
        assert_eq!(timestamps_to_strings(stored.clone()).into_json(), original);
        assert_eq!(stored.into_json(), original);
    }

    #[test]
    fn predicate_never_sees_containers() {
        let value = Value::from_json(json!({"a": [1, {"b": 2}]}));
        let mapped = map_leaves(
            value,
            &|leaf| !matches!(leaf, Value::Array(_) | Value::Map(_)),
            &|_| Value::Null,
        );
        assert_eq!(mapped.into_json(), json!({"a": [null, {"b": null}]}));
    }
}
