//! Import types: entity kinds, row outcomes, the aggregate result and
//! the progress/status messages published while a job runs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ENTITY KIND
// =============================================================================

/// Target entity of an import call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Lead,
    Property,
    Owner,
    Client,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Lead,
        EntityKind::Property,
        EntityKind::Owner,
        EntityKind::Client,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Lead => "lead",
            EntityKind::Property => "property",
            EntityKind::Owner => "owner",
            EntityKind::Client => "client",
        }
    }

    /// Storage table backing this entity
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Lead => "leads",
            EntityKind::Property => "properties",
            EntityKind::Owner => "owners",
            EntityKind::Client => "clients",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lead" | "leads" => Ok(EntityKind::Lead),
            "property" | "properties" | "listing" | "listings" => Ok(EntityKind::Property),
            "owner" | "owners" => Ok(EntityKind::Owner),
            "client" | "clients" => Ok(EntityKind::Client),
            other => Err(format!(
                "unknown entity kind '{}' (expected one of: {})",
                other,
                EntityKind::ALL.map(|k| k.as_str()).join(", ")
            )),
        }
    }
}

/// Authenticated caller of an import. Authorization happened upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportContext {
    pub user_id: Uuid,
    pub role: String,
}

impl ImportContext {
    pub fn new(user_id: Uuid, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
        }
    }
}

// =============================================================================
// ROW OUTCOMES AND RESULT
// =============================================================================

/// Outcome of a single input row. Every row yields exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Inserted { row: usize },
    Updated { row: usize },
    Error { row: usize, message: String },
}

/// Row-level error entry reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowError {
    /// 1-based data row (first row below the header is 1)
    pub row: usize,
    pub error: String,
}

/// Aggregate result of one import call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub total_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Number of batch transactions attempted
    pub batches: usize,
    pub errors: Vec<ImportRowError>,
}

impl ImportResult {
    pub fn new(total_rows: usize) -> Self {
        Self {
            total_rows,
            ..Default::default()
        }
    }

    /// Fold one row outcome into the running totals
    pub fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Inserted { .. } => self.inserted += 1,
            RowOutcome::Updated { .. } => self.updated += 1,
            RowOutcome::Error { row, message } => self.errors.push(ImportRowError {
                row,
                error: message,
            }),
        }
    }

    /// Order errors by row number. Called once when the job completes.
    pub fn finish(mut self) -> Self {
        self.errors.sort_by_key(|e| e.row);
        self
    }

    /// Short human-readable report, at most `max_errors` error lines
    pub fn summary(&self, max_errors: usize) -> String {
        let mut report = format!(
            "Rows: {}, inserted: {}, updated: {}, errors: {}, batches: {}\n",
            self.total_rows,
            self.inserted,
            self.updated,
            self.errors.len(),
            self.batches
        );
        for err in self.errors.iter().take(max_errors) {
            report.push_str(&format!("  row {}: {}\n", err.row, err.error));
        }
        if self.errors.len() > max_errors {
            report.push_str(&format!("  ... and {} more\n", self.errors.len() - max_errors));
        }
        report
    }
}

// =============================================================================
// PROGRESS
// =============================================================================

/// Progress notification emitted once per batch, before it is applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    /// 1-based batch number
    pub batch_index: usize,
    pub total_batches: usize,
    pub first_row: usize,
    pub last_row: usize,
    pub row_count: usize,
}

impl BatchProgress {
    pub fn rows_description(&self) -> String {
        if self.first_row == self.last_row {
            format!("row {}", self.first_row)
        } else {
            format!("rows {}-{}", self.first_row, self.last_row)
        }
    }
}

// =============================================================================
// NATS JOB MESSAGES
// =============================================================================

/// Request to import one uploaded spreadsheet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSubmitRequest {
    pub entity_kind: EntityKind,
    pub filename: String,
    /// Spreadsheet bytes, base64 encoded
    pub file_base64: String,
}

/// Status of an import job, published on `realty.job.import.status.<jobId>`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ImportJobStatus {
    /// Decoding the spreadsheet and mapping rows
    #[serde(rename_all = "camelCase")]
    Parsing { entity_kind: EntityKind, filename: String },
    /// Applying one batch
    #[serde(rename_all = "camelCase")]
    Importing {
        batch_index: usize,
        total_batches: usize,
        rows: String,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        result: ImportResult,
        duration_ms: u64,
    },
    /// The file could not be read; no rows were processed
    #[serde(rename_all = "camelCase")]
    Failed { error: String },
}

impl From<&BatchProgress> for ImportJobStatus {
    fn from(progress: &BatchProgress) -> Self {
        ImportJobStatus::Importing {
            batch_index: progress.batch_index,
            total_batches: progress.total_batches,
            rows: progress.rows_description(),
        }
    }
}

/// Status update envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobStatusUpdate {
    pub job_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: ImportJobStatus,
}

impl ImportJobStatusUpdate {
    pub fn new(job_id: Uuid, status: ImportJobStatus) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            status,
        }
    }
}
