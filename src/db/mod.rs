//! Database module

pub mod memory;
pub mod queries;
pub mod store;

pub use memory::MemoryImportStore;
pub use queries::import::PgImportStore;
pub use store::{ImportStore, ImportTx, StoreError};

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

/// Create a database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run database migrations.
///
/// Before running, synchronizes `_sqlx_migrations` with the compiled
/// migration list:
/// 1. Removes orphaned records (applied versions whose files no longer exist).
/// 2. Fixes checksum mismatches (CRLF/LF differences across platforms).
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    let migrator = sqlx::migrate!("./migrations");

    let compiled_versions: Vec<i64> = migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .map(|m| m.version)
        .collect();
    info!("Compiled migration versions: {:?}", compiled_versions);

    let applied_versions = get_applied_versions(pool).await?;
    info!("DB applied migration versions: {:?}", applied_versions);

    remove_orphaned_migrations(pool, &compiled_versions, &applied_versions).await?;
    fix_migration_checksums(pool, &migrator).await?;
    migrator.run(pool).await?;

    info!("Database migrations complete");
    Ok(())
}

async fn get_applied_versions(pool: &PgPool) -> Result<Vec<i64>> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')"
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(vec![]);
    }

    let rows: Vec<(i64,)> = sqlx::query_as("SELECT version FROM _sqlx_migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|(v,)| v).collect())
}

/// Drop `_sqlx_migrations` rows whose file is no longer compiled in
async fn remove_orphaned_migrations(
    pool: &PgPool,
    compiled_versions: &[i64],
    applied_versions: &[i64],
) -> Result<()> {
    for version in applied_versions
        .iter()
        .filter(|v| !compiled_versions.contains(v))
    {
        warn!("Removing orphaned migration record: version {}", version);
        sqlx::query("DELETE FROM _sqlx_migrations WHERE version = $1")
            .bind(version)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Align stored checksums with the ones embedded in this binary
async fn fix_migration_checksums(pool: &PgPool, migrator: &sqlx::migrate::Migrator) -> Result<()> {
    for migration in migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
    {
        let stored: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT checksum FROM _sqlx_migrations WHERE version = $1")
                .bind(migration.version)
                .fetch_optional(pool)
                .await?;

        let Some((stored_checksum,)) = stored else {
            continue;
        };
        let current_checksum: &[u8] = &migration.checksum;
        if stored_checksum != current_checksum {
            warn!(
                "Migration {} ({}) checksum mismatch, updating stored checksum",
                migration.version, migration.description
            );
            sqlx::query("UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2")
                .bind(current_checksum)
                .bind(migration.version)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}
