use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{StageOutcome, StageWorker};
use crate::db::{document_repo, run_repo};
use crate::extractor;
use crate::model::PipelineRun;
use crate::pipeline::{Stage, StageError, StageJob, WorkerContext};

/// Validates the document, fingerprints its bytes and rejects duplicates.
pub struct IntakeWorker;

#[async_trait]
impl StageWorker for IntakeWorker {
    fn stage(&self) -> Stage {
        Stage::Intake
    }

    async fn process(
        &self,
        ctx: &WorkerContext,
        job: &StageJob,
        run: &PipelineRun,
    ) -> Result<StageOutcome, StageError> {
        let doc = document_repo::find_by_id(&ctx.db, &job.document_id)?
            .ok_or_else(|| StageError::DocumentNotFound(job.document_id.clone()))?;

        let mime_type = doc.effective_mime_type().unwrap_or_default();
        if !extractor::is_supported(&mime_type) {
            let shown = if mime_type.is_empty() {
                "unknown".to_string()
            } else {
                mime_type
            };
            return Err(StageError::UnsupportedMimeType(shown));
        }

        let bytes = ctx
            .blobs
            .download(&doc.storage_bucket, &doc.storage_path)
            .await?;
        let hash = format!("{:x}", Sha256::digest(&bytes));

        if let Some(existing) =
            run_repo::find_completed_by_hash(&ctx.db, &run.matter_id, &hash, &run.id)?
        {
            return Err(StageError::Duplicate(existing));
        }
        run_repo::set_document_hash(&ctx.db, &run.id, &hash)?;

        tracing::debug!(
            document_id = %doc.id,
            mime_type = %mime_type,
            bytes = bytes.len(),
            "Document accepted"
        );
        Ok(StageOutcome::Completed(json!({
            "documentHash": hash,
            "mimeType": mime_type,
            "sizeBytes": bytes.len(),
        })))
    }
}
