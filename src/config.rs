//! Configuration management

use std::path::PathBuf;

use anyhow::{self, Context, Result};

use crate::services::import::DEFAULT_BATCH_SIZE;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Pool size
    pub db_max_connections: u32,

    /// JWT secret key for token validation
    pub jwt_secret: String,

    /// Rows per import transaction
    pub import_batch_size: usize,

    /// Optional JSON file extending the built-in header aliases
    pub import_aliases_path: Option<PathBuf>,
}

/// `IMPORT_ALIASES_PATH` from `.env` or the environment, blank treated as unset.
///
/// Dry runs need only this, without the database and NATS settings.
pub fn import_aliases_path_from_env() -> Option<PathBuf> {
    dotenvy::dotenv().ok();
    aliases_path_from(&|key: &str| std::env::var(key).ok())
}

fn aliases_path_from(var: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    var("IMPORT_ALIASES_PATH")
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let nats_url = var("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());

        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let db_max_connections = match var("DB_MAX_CONNECTIONS") {
            Some(v) => v
                .parse::<u32>()
                .with_context(|| format!("DB_MAX_CONNECTIONS must be a number, got '{}'", v))?,
            None => 10,
        };

        let jwt_secret = var("JWT_SECRET")
            .context("JWT_SECRET must be set, generate one with: openssl rand -base64 48")?;

        if jwt_secret.len() < 32 {
            anyhow::bail!(
                "JWT_SECRET must be at least 32 bytes (current: {} bytes). Generate one with: openssl rand -base64 48",
                jwt_secret.len()
            );
        }

        let import_batch_size = match var("IMPORT_BATCH_SIZE") {
            Some(v) => v
                .parse::<usize>()
                .with_context(|| format!("IMPORT_BATCH_SIZE must be a number, got '{}'", v))?,
            None => DEFAULT_BATCH_SIZE,
        };
        if import_batch_size == 0 {
            anyhow::bail!("IMPORT_BATCH_SIZE must be at least 1");
        }

        let import_aliases_path = aliases_path_from(&var);

        Ok(Self {
            nats_url,
            database_url,
            db_max_connections,
            jwt_secret,
            import_batch_size,
            import_aliases_path,
        })
    }
}
