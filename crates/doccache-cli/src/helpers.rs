//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, configuration loading, store wiring, and
//! parsing of the query flags.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use doccache_store::value::strings_to_timestamps;
use doccache_store::{
    DEFAULT_TIMESTAMP_FIELDS, FilterOperator, Query, RecordStore, Sort, SqliteDocumentStore,
    StoreConfig, Value,
};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{JsonInput, QueryArgs};
use crate::json_record::JsonRecord;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load settings from `path`, or from `config/default.toml` when it exists.
///
/// An explicit path must exist; the implicit default may be absent, in which
/// case built-in defaults apply.
pub fn load_config(path: Option<&Path>) -> Result<StoreConfig> {
    let (path, required) = match path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG_PATH), false),
    };

    if !required && !path.exists() {
        return Ok(StoreConfig::default());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Open the SQLite database named in `config` and wrap `collection` in a
/// cached record store.
pub async fn open_store(config: &StoreConfig, collection: &str) -> Result<RecordStore<JsonRecord>> {
    let path = &config.store.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let documents = SqliteDocumentStore::open(path.clone())
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    info!(path = %path.display(), collection, "store opened");

    let store = RecordStore::builder(collection)
        .store(Arc::new(documents))
        .json_codec()
        .with_config(config)
        .build()?;
    Ok(store)
}

// ---------------------------------------------------------------------------
// Input parsing
// ---------------------------------------------------------------------------

/// Read the JSON object given by `--json` or `--file`.
pub fn read_object(input: &JsonInput) -> Result<serde_json::Map<String, serde_json::Value>> {
    let raw = match (&input.json, &input.file) {
        (Some(json), _) => json.clone(),
        (None, Some(file)) => std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?,
        (None, None) => bail!("one of --json or --file is required"),
    };

    match serde_json::from_str(&raw).context("input is not valid JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("expected a JSON object, got {other}"),
    }
}

/// Parse a flag value as JSON, falling back to a bare string.
pub fn parse_value(raw: &str) -> Value {
    let json = serde_json::from_str(raw.trim())
        .unwrap_or_else(|_| serde_json::Value::String(raw.trim().to_string()));
    Value::from_json(json)
}

/// Parse a value compared against `property`; RFC 3339 strings become
/// timestamps only when `property` is a timestamp field.
pub fn parse_value_for(property: &str, raw: &str) -> Value {
    let value = parse_value(raw);
    if DEFAULT_TIMESTAMP_FIELDS.contains(&property) {
        strings_to_timestamps(value)
    } else {
        value
    }
}

/// Parse `property op value`.
pub fn parse_filter(raw: &str) -> Result<(String, FilterOperator, Value)> {
    let mut parts = raw.trim().splitn(3, char::is_whitespace);
    let (Some(property), Some(operator), Some(value)) = (parts.next(), parts.next(), parts.next())
    else {
        bail!("filter must look like `property op value`: {raw}");
    };
    let operator = FilterOperator::parse(operator)?;
    Ok((property.to_string(), operator, parse_value_for(property, value)))
}

/// Parse `property[:asc|desc]`.
pub fn parse_sort(raw: &str) -> Result<Sort> {
    match raw.rsplit_once(':') {
        None => Ok(Sort::asc(raw)),
        Some((property, "asc")) => Ok(Sort::asc(property)),
        Some((property, "desc")) => Ok(Sort::desc(property)),
        Some((_, other)) => bail!("unknown sort direction: {other}"),
    }
}

pub fn build_query(args: &QueryArgs) -> Result<Query> {
    let mut query = Query::new();
    for raw in &args.filters {
        let (property, operator, value) = parse_filter(raw)?;
        query = query.filter(property, operator, value);
    }
    let sort = args.sort.as_deref().map(parse_sort).transpose()?;
    let cursor_property = sort.as_ref().map(|s| s.property.clone()).unwrap_or_default();
    if let Some(sort) = sort {
        query = query.sort(sort);
    }
    if let Some(offset) = args.offset {
        query = query.offset(offset);
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }
    if let Some(before) = &args.before {
        query = query.before(parse_value_for(&cursor_property, before));
    }
    if let Some(after) = &args.after {
        query = query.after(parse_value_for(&cursor_property, after));
    }
    debug!(?query, "query built");
    Ok(query)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{out}");
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use doccache_store::SortDirection;

    #[test]
    fn filter_parses_json_operands() {
        let (property, operator, value) = parse_filter("tags in [\"a\", \"b\"]").unwrap();
        assert_eq!(property, "tags");
        assert_eq!(operator, FilterOperator::In);
        assert_eq!(value, Value::from(vec!["a", "b"]));
    }

    #[test]
    fn filter_falls_back_to_strings() {
        let (_, operator, value) = parse_filter("name == plain words").unwrap();
        assert_eq!(operator, FilterOperator::Eq);
        assert_eq!(value, Value::from("plain words"));
    }

    #[test]
    fn filter_promotes_dates() {
        let (_, _, value) = parse_filter("createdAt >= \"2019-01-01T00:00:00Z\"").unwrap();
        assert!(matches!(value, Value::Timestamp(_)));
    }

    #[test]
    fn filter_keeps_dates_on_plain_fields() {
        let (_, _, value) = parse_filter("label == \"2019-01-01T00:00:00+02:00\"").unwrap();
        assert_eq!(value, Value::from("2019-01-01T00:00:00+02:00"));
    }

    #[test]
    fn cursor_dates_follow_the_sort_field() {
        let args = QueryArgs {
            sort: Some("updatedAt:desc".into()),
            after: Some("2019-01-01T00:00:00Z".into()),
            ..Default::default()
        };
        let query = build_query(&args).unwrap();
        assert!(matches!(query.after, Some(Value::Timestamp(_))));

        let args = QueryArgs {
            sort: Some("label".into()),
            after: Some("2019-01-01T00:00:00Z".into()),
            ..Default::default()
        };
        let query = build_query(&args).unwrap();
        assert_eq!(query.after, Some(Value::from("2019-01-01T00:00:00Z")));
    }

    #[test]
    fn malformed_filters_are_rejected() {
        assert!(parse_filter("age").is_err());
        assert!(parse_filter("age ~ 3").is_err());
    }

    #[test]
    fn sort_directions() {
        assert_eq!(parse_sort("age").unwrap().direction, SortDirection::Asc);
        assert_eq!(parse_sort("age:desc").unwrap().direction, SortDirection::Desc);
        assert!(parse_sort("age:sideways").is_err());
    }

    #[test]
    fn query_from_flags() {
        let args = QueryArgs {
            filters: vec!["n > 1".into()],
            sort: Some("n:desc".into()),
            limit: Some(2),
            before: Some("5".into()),
            ..Default::default()
        };
        let query = build_query(&args).unwrap();
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.limit, Some(2));
        assert_eq!(query.before, Some(Value::Integer(5)));
    }

    #[test]
    fn read_object_requires_an_object() {
        let input = JsonInput {
            json: Some("[1]".into()),
            file: None,
        };
        assert!(read_object(&input).is_err());
        assert!(read_object(&JsonInput::default()).is_err());
    }

    #[test]
    fn missing_default_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("absent.toml");
        assert!(load_config(Some(&explicit)).is_err());

        let path = dir.path().join("doccache.toml");
        std::fs::write(&path, "[cache]\nenabled = false\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert!(!config.cache.enabled);
        assert_eq!(config.remove.page_size, 25);
    }

    #[tokio::test]
    async fn open_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.store.path = dir.path().join("nested/doccache.db");

        let store = open_store(&config, "things").await.unwrap();
        assert_eq!(store.collection(), "things");
        assert!(config.store.path.exists());
    }
}
