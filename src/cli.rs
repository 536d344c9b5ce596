//! CLI argument parsing for the realty-import-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::types::EntityKind;

#[derive(Parser)]
#[command(name = "realty-import-worker", about = "Real-estate CRM spreadsheet import worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Import one spreadsheet from disk and print the result as JSON
    Import {
        /// lead, property, owner or client
        #[arg(long)]
        kind: EntityKind,
        /// .xlsx, .xls, .ods or .csv file
        file: PathBuf,
        /// Run against an empty in-memory store instead of Postgres
        #[arg(long)]
        dry_run: bool,
        /// Rows per transaction (defaults to IMPORT_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<usize>,
        /// User recorded as creator of imported rows
        #[arg(long)]
        user_id: Option<Uuid>,
    },
}
