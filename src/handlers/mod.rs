//! NATS message handlers

pub mod import;
pub mod ping;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_nats::Client;
use sqlx::PgPool;
use tokio::select;
use tracing::{error, info};

use crate::config::Config;
use crate::db::PgImportStore;
use crate::services::import::{FieldConfigSet, ImportPipeline};

use self::import::{ImportProcessor, IMPORT_SUBMIT_SUBJECT};
use self::ping::PING_SUBJECT;

/// Built-in field configuration, extended by the alias overrides file if set
pub fn load_field_configs(aliases_path: Option<&Path>) -> Result<FieldConfigSet> {
    match aliases_path {
        Some(path) => {
            let set = FieldConfigSet::from_overrides_file(path)
                .with_context(|| format!("loading import aliases from {}", path.display()))?;
            info!("Loaded import alias overrides from {}", path.display());
            Ok(set)
        }
        None => Ok(FieldConfigSet::default()),
    }
}

/// Start all message handlers
pub async fn start_handlers(client: Client, pool: PgPool, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    let field_configs = Arc::new(load_field_configs(config.import_aliases_path.as_deref())?);
    let pipeline = ImportPipeline::new(PgImportStore::new(pool), field_configs)
        .with_batch_size(config.import_batch_size);
    let processor = Arc::new(ImportProcessor::new(client.clone(), pipeline));
    let jwt_secret = Arc::new(config.jwt_secret.clone());

    // Subscribe to all subjects
    let ping_sub = client.subscribe(PING_SUBJECT).await?;
    let import_submit_sub = client.subscribe(IMPORT_SUBMIT_SUBJECT).await?;
    info!("Subscribed to NATS subjects");

    let client_ping = client.clone();
    let client_import = client.clone();

    // Spawn handlers
    let ping_handle = tokio::spawn(async move { ping::handle_ping(client_ping, ping_sub).await });

    let import_submit_handle = tokio::spawn(async move {
        import::handle_import_submit(client_import, import_submit_sub, processor, jwt_secret).await
    });

    info!(
        "Handlers running (import batch size {})",
        config.import_batch_size
    );

    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = import_submit_handle => {
            error!("Import submit handler finished: {:?}", result);
        }
    }

    Ok(())
}
