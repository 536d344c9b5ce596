//! Batch transaction runner

use tracing::{debug, warn};

use crate::db::ImportStore;
use crate::types::{CandidateRecord, ImportContext, RowOutcome};

use super::error::BatchWriteError;
use super::fields::EntityFieldConfig;
use super::reconcile;

/// Apply `records` in order inside one transaction.
///
/// All or nothing: the first failing write rolls back the whole batch and
/// is returned as the batch error.
pub async fn run_batch<S: ImportStore + ?Sized>(
    store: &S,
    ctx: &ImportContext,
    config: &EntityFieldConfig,
    records: Vec<CandidateRecord>,
) -> Result<Vec<RowOutcome>, BatchWriteError> {
    let mut tx = store.begin(ctx).await.map_err(BatchWriteError::Begin)?;
    let mut outcomes = Vec::with_capacity(records.len());

    for record in records {
        let row = record.row;
        match reconcile::apply(tx.as_mut(), config, record).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(source) => {
                if let Err(e) = tx.rollback().await {
                    warn!("Rollback after row {} failed: {}", row, e);
                }
                return Err(BatchWriteError::Row { row, source });
            }
        }
    }

    tx.commit().await.map_err(BatchWriteError::Commit)?;
    debug!("Committed batch of {} rows", outcomes.len());
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryImportStore;
    use crate::types::{EntityKind, FieldValue};
    use uuid::Uuid;

    fn owner(row: usize) -> CandidateRecord {
        let mut record = CandidateRecord::new(EntityKind::Owner, row);
        record.set("name", FieldValue::Text(format!("Owner {}", row)));
        record.set("phone", FieldValue::Text(format!("98200{:05}", row)));
        record
    }

    fn ctx() -> ImportContext {
        ImportContext::new(Uuid::new_v4(), "admin")
    }

    #[tokio::test]
    async fn test_batch_commits_all_rows() {
        let store = MemoryImportStore::new();
        let config = EntityFieldConfig::owner();
        let outcomes = run_batch(&store, &ctx(), &config, (1..=10).map(owner).collect())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 10);
        assert_eq!(store.count(EntityKind::Owner), 10);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_failing_row_rolls_back_entire_batch() {
        let store = MemoryImportStore::new();
        store.fail_when(EntityKind::Owner, "phone", "9820000055");
        let config = EntityFieldConfig::owner();

        let err = run_batch(&store, &ctx(), &config, (1..=100).map(owner).collect())
            .await
            .unwrap_err();

        assert!(matches!(err, BatchWriteError::Row { row: 55, .. }));
        assert_eq!(store.count(EntityKind::Owner), 0);
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_commits_nothing() {
        let store = MemoryImportStore::new();
        let outcomes = run_batch(&store, &ctx(), &EntityFieldConfig::owner(), Vec::new())
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }
}
