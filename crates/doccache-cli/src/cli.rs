//! CLI argument definitions for doccache.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// doccache -- cached JSON records over SQLite.
#[derive(Parser)]
#[command(
    name = "doccache",
    version,
    about = "doccache -- cached JSON records over SQLite",
    long_about = "Create, read, patch, query and bulk-remove JSON records stored in a \
                  SQLite-backed collection, with timestamp-guarded caching and cursor \
                  pagination."
)]
pub struct Cli {
    /// Configuration file (defaults to config/default.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Collection to operate on.
    #[arg(long, short, global = true, default_value = "records")]
    pub collection: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Insert a new record. Missing `id`, `createdAt` and `updatedAt` are filled in.
    Create {
        #[command(flatten)]
        input: JsonInput,
    },

    /// Print one record.
    Get {
        id: String,

        /// Fail when the record does not exist.
        #[arg(long)]
        required: bool,
    },

    /// Deep-merge fields into a record.
    Patch {
        id: String,

        #[command(flatten)]
        input: JsonInput,

        /// Dotted field path to delete (repeatable).
        #[arg(long = "unset", value_name = "PATH")]
        unset: Vec<String>,
    },

    /// Overwrite a record, keeping its `createdAt`.
    Update {
        id: String,

        #[command(flatten)]
        input: JsonInput,
    },

    /// Delete one record.
    Remove { id: String },

    /// List records matching a query.
    Query {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Delete every record matching a query and print their ids.
    RemoveByQuery {
        #[command(flatten)]
        query: QueryArgs,

        /// Walk matches in id-ordered pages instead of one scan.
        #[arg(long)]
        paginate: bool,

        /// Page size and delete concurrency (defaults to `[remove] page_size`).
        #[arg(long)]
        page_size: Option<usize>,
    },
}

/// A JSON object given inline or read from a file.
#[derive(Args, Debug, Default)]
pub struct JsonInput {
    /// Inline JSON object.
    #[arg(long, conflicts_with = "file")]
    pub json: Option<String>,

    /// Path to a file holding a JSON object.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct QueryArgs {
    /// `property op value`, e.g. `age >= 21` or `tags array-contains "x"` (repeatable).
    #[arg(long = "filter", value_name = "FILTER")]
    pub filters: Vec<String>,

    /// `property[:asc|desc]`.
    #[arg(long)]
    pub sort: Option<String>,

    #[arg(long)]
    pub offset: Option<usize>,

    #[arg(long)]
    pub limit: Option<usize>,

    /// Exclusive upper cursor on the sort property (JSON value).
    #[arg(long, conflicts_with = "after")]
    pub before: Option<String>,

    /// Exclusive lower cursor on the sort property (JSON value).
    #[arg(long)]
    pub after: Option<String>,
}
