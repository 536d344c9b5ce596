//! Import pipeline error taxonomy
//!
//! Two channels: `ImportError` aborts a whole call before any row is
//! processed; `RowError` is collected per row and never stops the job.

use thiserror::Error;

use crate::db::StoreError;

/// Fatal, whole-job error
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("could not read file: {0}")]
    MalformedFile(String),
}

/// A raw value that could not be converted to its field's type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid value for {field}: '{raw}' (expected {expected})")]
pub struct CoercionError {
    pub field: String,
    pub raw: String,
    pub expected: &'static str,
}

/// Row-level failure, reported in `ImportResult.errors`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingRequired(Vec<&'static str>),

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error("{0}")]
    Relationship(String),

    #[error("Batch {batch_index}/{total_batches} ({rows}) rolled back: {cause}")]
    BatchRolledBack {
        batch_index: usize,
        total_batches: usize,
        rows: String,
        cause: String,
    },
}

/// Storage failure that rolled back a whole batch
#[derive(Debug, Error)]
pub enum BatchWriteError {
    #[error("could not open transaction: {0}")]
    Begin(#[source] StoreError),

    #[error("row {row}: {source}")]
    Row {
        row: usize,
        #[source]
        source: StoreError,
    },

    #[error("commit failed: {0}")]
    Commit(#[source] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_required_message_lists_fields() {
        let err = RowError::MissingRequired(vec!["phone", "source"]);
        assert_eq!(err.to_string(), "Missing required fields: phone, source");
    }

    #[test]
    fn test_coercion_message_carries_raw_value() {
        let err = RowError::from(CoercionError {
            field: "price".to_string(),
            raw: "call us".to_string(),
            expected: "decimal",
        });
        assert_eq!(err.to_string(), "Invalid value for price: 'call us' (expected decimal)");
    }

    #[test]
    fn test_batch_write_error_names_failing_row() {
        let err = BatchWriteError::Row {
            row: 55,
            source: StoreError::Constraint("duplicate phone".to_string()),
        };
        assert_eq!(err.to_string(), "row 55: constraint violation: duplicate phone");
    }

    #[test]
    fn test_batch_rolled_back_message() {
        let err = RowError::BatchRolledBack {
            batch_index: 2,
            total_batches: 3,
            rows: "rows 101-200".to_string(),
            cause: "row 155: constraint violation".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Batch 2/3 (rows 101-200) rolled back: row 155: constraint violation"
        );
    }
}
