//! Declarative query description and its canonical cache key.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::value::Value;

/// Comparison operators understood by the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::In => "in",
            Self::NotIn => "not-in",
            Self::ArrayContains => "array-contains",
            Self::ArrayContainsAny => "array-contains-any",
        }
    }

    /// Parse the wire form of an operator (`">="`, `"not-in"`, ...).
    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Gte),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Lte),
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::NotEq),
            "in" => Ok(Self::In),
            "not-in" => Ok(Self::NotIn),
            "array-contains" => Ok(Self::ArrayContains),
            "array-contains-any" => Ok(Self::ArrayContainsAny),
            other => Err(StoreError::InvalidQuery(format!(
                "unknown filter operator: {other}"
            ))),
        }
    }

    /// Operators whose operand must be an array of candidates.
    pub fn takes_array(&self) -> bool {
        matches!(self, Self::In | Self::NotIn | Self::ArrayContainsAny)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `property operator value` constraint. Filters are conjunctive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub property: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl Filter {
    pub fn new(property: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            property: property.into(),
            operator,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn reversed(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => f.write_str("asc"),
            Self::Desc => f.write_str("desc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sort {
    pub property: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Caller-facing query description.
///
/// `before` and `after` are exclusive cursors on the sort property; they are
/// mutually exclusive and both require `sort`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Sort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(
        mut self,
        property: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter::new(property, operator, value));
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn before(mut self, cursor: impl Into<Value>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    pub fn after(mut self, cursor: impl Into<Value>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    /// Canonical cache key for this query.
    pub fn cache_key(&self) -> StoreResult<QueryCacheKey> {
        QueryCacheKey::of(self)
    }
}

// ── canonical key ────────────────────────────────────────────────────

/// Canonical, order-independent serialization of a [`Query`].
///
/// Object keys come out sorted (maps are `BTreeMap`s and `serde_json`
/// objects are sorted without `preserve_order`), and because filters are
/// conjunctive they are sorted by their own encoding as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCacheKey(String);

impl QueryCacheKey {
    pub fn of(query: &Query) -> StoreResult<Self> {
        let mut json = serde_json::to_value(query)?;

        if let Some(serde_json::Value::Array(filters)) = json.get_mut("filters") {
            let mut encoded: Vec<(String, serde_json::Value)> = filters
                .drain(..)
                .map(|f| (f.to_string(), f))
                .collect();
            encoded.sort_by(|a, b| a.0.cmp(&b.0));
            filters.extend(encoded.into_iter().map(|(_, f)| f));
        }

        Ok(Self(json.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── tests ────────────────────────────────────────────────────────────
