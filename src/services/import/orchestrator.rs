//! Job orchestrator: map every row, slice the candidates into batches,
//! run the batches one after another and fold everything into a single
//! `ImportResult`.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::db::ImportStore;
use crate::types::{
    BatchProgress, CandidateRecord, EntityKind, ImportContext, ImportResult, RawRow, RowOutcome,
};

use super::batch::run_batch;
use super::error::{ImportError, RowError};
use super::fields::FieldConfigSet;
use super::mapper::RowMapper;
use super::normalize::ColumnNormalizer;
use super::parser::Spreadsheet;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Error lines included in the logged job summary
const SUMMARY_ERROR_LINES: usize = 10;

/// Receives one notification per batch, before the batch is applied
pub trait ProgressSink: Send + Sync {
    fn on_batch(&self, progress: &BatchProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&BatchProgress) + Send + Sync,
{
    fn on_batch(&self, progress: &BatchProgress) {
        self(progress)
    }
}

pub struct ImportPipeline<S> {
    store: S,
    configs: Arc<FieldConfigSet>,
    batch_size: usize,
}

impl<S: ImportStore> ImportPipeline<S> {
    pub fn new(store: S, configs: Arc<FieldConfigSet>) -> Self {
        Self {
            store,
            configs,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Zero is treated as one
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decode an upload and import its rows.
    ///
    /// Fails only when the file cannot be read; every row-level problem is
    /// reported in the returned result.
    pub async fn import_file(
        &self,
        ctx: &ImportContext,
        kind: EntityKind,
        bytes: &[u8],
        filename: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> Result<ImportResult, ImportError> {
        let sheet = Spreadsheet::from_bytes(bytes, filename)?;
        let normalizer = ColumnNormalizer::new(self.configs.get(kind));
        let ignored: Vec<&str> = sheet
            .headers()
            .filter(|h| normalizer.resolve(h).is_none())
            .collect();
        if !ignored.is_empty() {
            debug!("Ignoring unrecognized {} columns: {}", kind, ignored.join(", "));
        }

        let rows: Vec<RawRow> = sheet.rows().collect();
        Ok(self.import(ctx, kind, rows, progress).await)
    }

    /// Import already-parsed rows. Every row yields exactly one outcome.
    pub async fn import(
        &self,
        ctx: &ImportContext,
        kind: EntityKind,
        rows: Vec<RawRow>,
        progress: &dyn ProgressSink,
    ) -> ImportResult {
        let started = Instant::now();
        let config = self.configs.get(kind);
        let mapper = RowMapper::new(config);

        let mut result = ImportResult::new(rows.len());
        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            match mapper.map_row(row) {
                Ok(record) => candidates.push(record),
                Err(e) => result.record(RowOutcome::Error {
                    row: row.index(),
                    message: e.to_string(),
                }),
            }
        }

        let batches = split_batches(candidates, self.batch_size);
        let total_batches = batches.len();
        info!(
            "Importing {} {} rows for user {}: {} valid, {} batches of up to {}",
            rows.len(),
            kind,
            ctx.user_id,
            result.total_rows - result.errors.len(),
            total_batches,
            self.batch_size
        );

        for (i, batch) in batches.into_iter().enumerate() {
            let batch_progress = BatchProgress {
                batch_index: i + 1,
                total_batches,
                first_row: batch.first().map_or(0, |r| r.row),
                last_row: batch.last().map_or(0, |r| r.row),
                row_count: batch.len(),
            };
            progress.on_batch(&batch_progress);
            result.batches += 1;

            let batch_rows: Vec<usize> = batch.iter().map(|r| r.row).collect();
            match run_batch(&self.store, ctx, config, batch).await {
                Ok(outcomes) => {
                    debug!(
                        "Batch {}/{} ({}) committed",
                        batch_progress.batch_index,
                        total_batches,
                        batch_progress.rows_description()
                    );
                    outcomes.into_iter().for_each(|o| result.record(o));
                }
                Err(e) => {
                    let message = RowError::BatchRolledBack {
                        batch_index: batch_progress.batch_index,
                        total_batches,
                        rows: batch_progress.rows_description(),
                        cause: e.to_string(),
                    }
                    .to_string();
                    warn!("{}", message);
                    for row in batch_rows {
                        result.record(RowOutcome::Error {
                            row,
                            message: message.clone(),
                        });
                    }
                }
            }
        }

        let result = result.finish();
        info!(
            "Import of {} finished in {} ms\n{}",
            kind,
            started.elapsed().as_millis(),
            result.summary(SUMMARY_ERROR_LINES)
        );
        result
    }
}

fn split_batches(candidates: Vec<CandidateRecord>, batch_size: usize) -> Vec<Vec<CandidateRecord>> {
    let mut batches = Vec::with_capacity(candidates.len().div_ceil(batch_size));
    let mut iter = candidates.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }
    batches
}
