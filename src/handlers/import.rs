//! Spreadsheet import handler
//!
//! `realty.import.submit` runs one import per request and replies with the
//! complete result. Lifecycle and per-batch progress are published on
//! `realty.job.import.status.<jobId>`, where the job id is the request id.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth;
use crate::db::ImportStore;
use crate::services::import::{ImportError, ImportPipeline};
use crate::types::{
    BatchProgress, ErrorResponse, ImportContext, ImportJobStatus, ImportJobStatusUpdate,
    ImportResult, ImportSubmitRequest, Request, SuccessResponse,
};

pub const IMPORT_SUBMIT_SUBJECT: &str = "realty.import.submit";
const IMPORT_STATUS_PREFIX: &str = "realty.job.import.status";

// =============================================================================
// PROCESSOR
// =============================================================================

pub struct ImportProcessor<S> {
    client: Client,
    pipeline: ImportPipeline<S>,
}

impl<S: ImportStore + 'static> ImportProcessor<S> {
    pub fn new(client: Client, pipeline: ImportPipeline<S>) -> Self {
        Self { client, pipeline }
    }

    pub async fn publish_status(&self, job_id: Uuid, status: ImportJobStatus) -> Result<()> {
        let update = ImportJobStatusUpdate::new(job_id, status);
        let subject = format!("{}.{}", IMPORT_STATUS_PREFIX, job_id);
        let payload = serde_json::to_vec(&update)?;
        self.client.publish(subject, payload.into()).await?;
        Ok(())
    }

    /// Run one import job, publishing its lifecycle as it goes
    pub async fn process_job(
        &self,
        job_id: Uuid,
        ctx: &ImportContext,
        request: ImportSubmitRequest,
        bytes: Vec<u8>,
    ) -> Result<ImportResult, ImportError> {
        let started = Instant::now();
        info!(
            "Import job {}: {} from '{}' ({} bytes) by {}",
            job_id,
            request.entity_kind,
            request.filename,
            bytes.len(),
            ctx.user_id
        );

        self.try_publish(
            job_id,
            ImportJobStatus::Parsing {
                entity_kind: request.entity_kind,
                filename: request.filename.clone(),
            },
        )
        .await;

        // Progress is emitted synchronously by the pipeline; a forwarder
        // task publishes it in order.
        let (tx, mut rx) = mpsc::unbounded_channel::<ImportJobStatus>();
        let client = self.client.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(status) = rx.recv().await {
                let update = ImportJobStatusUpdate::new(job_id, status);
                let subject = format!("{}.{}", IMPORT_STATUS_PREFIX, job_id);
                match serde_json::to_vec(&update) {
                    Ok(payload) => {
                        if let Err(e) = client.publish(subject, payload.into()).await {
                            warn!("Failed to publish import progress for {}: {}", job_id, e);
                        }
                    }
                    Err(e) => warn!("Failed to encode import progress for {}: {}", job_id, e),
                }
            }
        });

        let sink = move |progress: &BatchProgress| {
            let _ = tx.send(ImportJobStatus::from(progress));
        };
        let outcome = self
            .pipeline
            .import_file(
                ctx,
                request.entity_kind,
                &bytes,
                Some(request.filename.as_str()),
                &sink,
            )
            .await;
        drop(sink);
        if let Err(e) = forwarder.await {
            warn!("Import progress forwarder for {} stopped: {}", job_id, e);
        }

        let status = match &outcome {
            Ok(result) => ImportJobStatus::Completed {
                result: result.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => ImportJobStatus::Failed {
                error: e.to_string(),
            },
        };
        self.try_publish(job_id, status).await;

        outcome
    }

    /// Status updates are advisory; a failed publish never fails the job
    async fn try_publish(&self, job_id: Uuid, status: ImportJobStatus) {
        if let Err(e) = self.publish_status(job_id, status).await {
            warn!("Failed to publish import status for {}: {}", job_id, e);
        }
    }
}

// =============================================================================
// REQUEST HANDLING
// =============================================================================

/// Decode the upload, accepting an optional `data:...;base64,` prefix
pub fn decode_upload(file_base64: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let encoded = match file_base64.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => file_base64,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact)
}

fn error_code(err: &ImportError) -> &'static str {
    match err {
        ImportError::MalformedFile(_) => "MALFORMED_FILE",
    }
}

async fn reply_error(client: &Client, reply: async_nats::Subject, error: ErrorResponse) -> Result<()> {
    let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
    Ok(())
}

/// Handle realty.import.submit
pub async fn handle_import_submit<S: ImportStore + 'static>(
    client: Client,
    mut subscriber: Subscriber,
    processor: Arc<ImportProcessor<S>>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<ImportSubmitRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import submit request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_error(&client, reply, error).await?;
                continue;
            }
        };

        let ctx = match auth::extract_auth(&request, &jwt_secret) {
            Ok(ctx) => ctx,
            Err(e) => {
                let error = ErrorResponse::new(request.id, "UNAUTHORIZED", e.to_string());
                reply_error(&client, reply, error).await?;
                continue;
            }
        };

        let bytes = match decode_upload(&request.payload.file_base64) {
            Ok(bytes) => bytes,
            Err(e) => {
                let error = ErrorResponse::new(request.id, "INVALID_REQUEST", format!("fileBase64 is not valid base64: {}", e))
                    .with_details(serde_json::json!({ "field": "fileBase64" }));
                reply_error(&client, reply, error).await?;
                continue;
            }
        };

        let processor = Arc::clone(&processor);
        let client = client.clone();
        tokio::spawn(async move {
            let job_id = request.id;
            let response = match processor.process_job(job_id, &ctx, request.payload, bytes).await {
                Ok(result) => serde_json::to_vec(&SuccessResponse::new(job_id, result)),
                Err(e) => {
                    warn!("Import job {} failed: {}", job_id, e);
                    serde_json::to_vec(&ErrorResponse::new(job_id, error_code(&e), e.to_string()))
                }
            };
            match response {
                Ok(payload) => {
                    if let Err(e) = client.publish(reply, payload.into()).await {
                        error!("Failed to reply to import job {}: {}", job_id, e);
                    }
                }
                Err(e) => error!("Failed to encode reply for import job {}: {}", job_id, e),
            }
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_base64() {
        assert_eq!(decode_upload("aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn test_decode_data_url_and_line_breaks() {
        let encoded = "data:application/vnd.openxmlformats-officedocument.spreadsheetml.sheet;base64,aGVs\nbG8=";
        assert_eq!(decode_upload(encoded).unwrap(), b"hello");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_upload("***not base64***").is_err());
    }

    #[test]
    fn test_malformed_file_error_code() {
        let err = ImportError::MalformedFile("workbook has no sheets".to_string());
        assert_eq!(error_code(&err), "MALFORMED_FILE");
    }

    #[test]
    fn test_submit_request_parses_camel_case() {
        let json = format!(
            r#"{{"id":"{}","timestamp":"2025-11-17T10:00:00Z","token":"t",
               "payload":{{"entityKind":"lead","filename":"leads.xlsx","fileBase64":"aGVsbG8="}}}}"#,
            Uuid::nil()
        );
        let request: Request<ImportSubmitRequest> = serde_json::from_str(&json).unwrap();
        assert_eq!(request.payload.filename, "leads.xlsx");
        assert_eq!(request.payload.entity_kind, crate::types::EntityKind::Lead);
    }
}
