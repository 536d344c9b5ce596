//! Storage seam used by the import pipeline
//!
//! Postgres in production (`PgImportStore`), in-process for tests and dry
//! runs (`MemoryImportStore`).

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{CandidateRecord, DedupMatch, EntityKind, ImportContext};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },

    #[error("transaction already finished")]
    Finished,
}

/// Opens one transaction per batch
#[async_trait]
pub trait ImportStore: Send + Sync {
    async fn begin(&self, ctx: &ImportContext) -> Result<Box<dyn ImportTx>, StoreError>;
}

/// One open batch transaction.
///
/// Reads observe the transaction's own earlier writes. Dropping a
/// transaction that was not committed rolls it back.
#[async_trait]
pub trait ImportTx: Send {
    /// First existing entity whose fields equal every pair in `key`
    async fn find_by_dedup_key(
        &mut self,
        kind: EntityKind,
        key: &DedupMatch,
    ) -> Result<Option<Uuid>, StoreError>;

    async fn insert(&mut self, kind: EntityKind, record: &CandidateRecord) -> Result<Uuid, StoreError>;

    /// Overwrite only the fields present in `record`
    async fn update(
        &mut self,
        kind: EntityKind,
        id: Uuid,
        record: &CandidateRecord,
    ) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}
