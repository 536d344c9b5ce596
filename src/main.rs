//! Realty Import Worker - bulk spreadsheet import for the brokerage CRM
//!
//! Serves import requests over NATS, or runs a single import from the
//! command line.

mod auth;
mod cli;
mod config;
mod db;
mod handlers;
mod services;
mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::cli::{Cli, Command};
use crate::db::{ImportStore, MemoryImportStore, PgImportStore};
use crate::services::import::{ImportPipeline, DEFAULT_BATCH_SIZE};
use crate::types::{BatchProgress, EntityKind, ImportContext};

fn init_logging() -> WorkerGuard {
    // Logs directory - use LOGS_DIR env var or default to ../logs (relative to worker)
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,realty_import_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logging();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Migrate => migrate().await,
        Command::Import {
            kind,
            file,
            dry_run,
            batch_size,
            user_id,
        } => run_import(kind, &file, dry_run, batch_size, user_id).await,
    }
}

async fn serve() -> Result<()> {
    info!("Starting Realty Import Worker...");

    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await?;

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    if let Err(e) = handlers::start_handlers(nats_client, pool, &config).await {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}

async fn migrate() -> Result<()> {
    let config = config::Config::from_env()?;
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await
}

async fn run_import(
    kind: EntityKind,
    file: &Path,
    dry_run: bool,
    batch_size: Option<usize>,
    user_id: Option<Uuid>,
) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let filename = file.file_name().and_then(|n| n.to_str());
    let ctx = ImportContext::new(user_id.unwrap_or_else(Uuid::nil), "cli");

    if dry_run {
        let aliases_path = config::import_aliases_path_from_env();
        let field_configs = handlers::load_field_configs(aliases_path.as_deref())?;
        let pipeline = ImportPipeline::new(MemoryImportStore::new(), Arc::new(field_configs))
            .with_batch_size(batch_size.unwrap_or(DEFAULT_BATCH_SIZE));
        info!("Dry run: importing into an empty in-memory store");
        import_and_print(&pipeline, &ctx, kind, &bytes, filename).await?;
        info!(
            "Dry run finished, store would hold {} {} rows",
            pipeline.store().count(kind),
            kind
        );
        return Ok(());
    }

    let config = config::Config::from_env()?;
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;
    let pipeline = ImportPipeline::new(
        PgImportStore::new(pool),
        Arc::new(handlers::load_field_configs(config.import_aliases_path.as_deref())?),
    )
    .with_batch_size(batch_size.unwrap_or(config.import_batch_size));

    import_and_print(&pipeline, &ctx, kind, &bytes, filename).await
}

async fn import_and_print<S: ImportStore>(
    pipeline: &ImportPipeline<S>,
    ctx: &ImportContext,
    kind: EntityKind,
    bytes: &[u8],
    filename: Option<&str>,
) -> Result<()> {
    let progress = |p: &BatchProgress| {
        eprintln!("Batch {}/{} ({})", p.batch_index, p.total_batches, p.rows_description());
    };
    let result = pipeline.import_file(ctx, kind, bytes, filename, &progress).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
