//! CLI entry point for doccache.
//!
//! This binary provides the `doccache` command with one subcommand per
//! record-store operation. Records are printed as pretty JSON on stdout;
//! logs go to stderr.

mod cli;
mod helpers;
mod json_record;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use doccache_store::{Patch, RecordStore};
use tracing::{debug, info};

use crate::cli::{Cli, Commands};
use crate::json_record::JsonRecord;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = helpers::load_config(cli.config.as_deref())?;
    helpers::init_tracing(&config.log.level);

    let store = helpers::open_store(&config, &cli.collection).await?;
    let result = dispatch(&store, cli.command).await;

    debug!(stats = %store.cache_stats(), "cache usage");
    result
}

async fn dispatch(store: &RecordStore<JsonRecord>, command: Commands) -> Result<()> {
    match command {
        Commands::Create { input } => cmd_create(store, &input).await,
        Commands::Get { id, required } => cmd_get(store, &id, required).await,
        Commands::Patch { id, input, unset } => cmd_patch(store, &id, &input, unset).await,
        Commands::Update { id, input } => cmd_update(store, &id, &input).await,
        Commands::Remove { id } => cmd_remove(store, &id).await,
        Commands::Query { query } => cmd_query(store, &query).await,
        Commands::RemoveByQuery {
            query,
            paginate,
            page_size,
        } => cmd_remove_by_query(store, &query, paginate, page_size).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommands: single records
// ---------------------------------------------------------------------------

async fn cmd_create(store: &RecordStore<JsonRecord>, input: &cli::JsonInput) -> Result<()> {
    let object = helpers::read_object(input)?;
    let record = JsonRecord::stamped(object, Utc::now())?;

    let created = store
        .create(&record)
        .await
        .with_context(|| format!("failed to create {}", record.id))?;
    info!(id = %created.id, "record created");
    helpers::print_json(&created)
}

async fn cmd_get(store: &RecordStore<JsonRecord>, id: &str, required: bool) -> Result<()> {
    let record = if required {
        Some(store.get_or_throw(id, true).await?)
    } else {
        store.get(id).await?
    };
    helpers::print_json(&record)
}

async fn cmd_patch(
    store: &RecordStore<JsonRecord>,
    id: &str,
    input: &cli::JsonInput,
    unset: Vec<String>,
) -> Result<()> {
    let mut patch = if input.json.is_some() || input.file.is_some() {
        let object = helpers::read_object(input)?;
        Patch::from_json(serde_json::Value::Object(object))?
    } else {
        Patch::new()
    };
    for path in unset {
        patch = patch.remove(path);
    }

    let patched = store
        .patch(id, patch, Utc::now())
        .await
        .with_context(|| format!("failed to patch {id}"))?;
    helpers::print_json(&patched)
}

async fn cmd_update(store: &RecordStore<JsonRecord>, id: &str, input: &cli::JsonInput) -> Result<()> {
    let object = helpers::read_object(input)?;
    let record = JsonRecord::replacing(id, object);

    let updated = store
        .update(id, &record, Utc::now())
        .await
        .with_context(|| format!("failed to update {id}"))?;
    helpers::print_json(&updated)
}

async fn cmd_remove(store: &RecordStore<JsonRecord>, id: &str) -> Result<()> {
    store
        .remove(id)
        .await
        .with_context(|| format!("failed to remove {id}"))?;
    info!(id, "record removed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommands: queries
// ---------------------------------------------------------------------------

async fn cmd_query(store: &RecordStore<JsonRecord>, args: &cli::QueryArgs) -> Result<()> {
    let query = helpers::build_query(args)?;
    let records = store.query(&query).await?;
    info!(count = records.len(), "query complete");
    helpers::print_json(&records)
}

async fn cmd_remove_by_query(
    store: &RecordStore<JsonRecord>,
    args: &cli::QueryArgs,
    paginate: bool,
    page_size: Option<usize>,
) -> Result<()> {
    let query = helpers::build_query(args)?;
    let removed = store.remove_by_query(&query, paginate, page_size).await?;
    info!(count = removed.len(), paginate, "records removed");
    helpers::print_json(&removed)
}
