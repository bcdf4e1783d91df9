use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{StageOutcome, StageWorker};
use crate::ai::AiRequest;
use crate::db::{document_repo, run_repo};
use crate::extractor;
use crate::model::PipelineRun;
use crate::pipeline::{Stage, StageError, StageJob, WorkerContext};

const VISION_PROMPT: &str = "Transcribe all text in this document image verbatim. \
Preserve reading order and line breaks. Do not summarise, translate or add commentary. \
Return only the transcribed text.";

/// Produces the document's plain text: vision model for images, the text
/// extractor for everything else.
pub struct OcrWorker;

#[async_trait]
impl StageWorker for OcrWorker {
    fn stage(&self) -> Stage {
        Stage::Ocr
    }

    async fn process(
        &self,
        ctx: &WorkerContext,
        job: &StageJob,
        run: &PipelineRun,
    ) -> Result<StageOutcome, StageError> {
        let doc = document_repo::find_by_id(&ctx.db, &job.document_id)?
            .ok_or_else(|| StageError::DocumentNotFound(job.document_id.clone()))?;
        if doc.has_text() {
            return Ok(StageOutcome::Skipped("text already extracted".to_string()));
        }

        let mime_type = doc
            .effective_mime_type()
            .ok_or_else(|| StageError::UnsupportedMimeType("unknown".to_string()))?;
        let bytes = ctx
            .blobs
            .download(&doc.storage_bucket, &doc.storage_path)
            .await?;

        let (text, tokens_used, source) = if extractor::is_image(&mime_type) {
            let ai = &ctx.settings.ai;
            let request = AiRequest::new(&ai.vision_model, VISION_PROMPT)
                .with_image(&mime_type, &bytes)
                .with_timeout(ai.timeout())
                .with_max_retries(ai.max_retries);
            let response = ctx.ai.call(request).await?;
            (response.content, response.tokens_used, "vision")
        } else {
            let text_extractor = Arc::clone(&ctx.extractor);
            let mime = mime_type.clone();
            let text = tokio::task::spawn_blocking(move || text_extractor.extract(&bytes, &mime))
                .await
                .map_err(|e| StageError::Task(e.to_string()))??;
            (text, 0, "extractor")
        };

        if text.trim().is_empty() {
            return Err(StageError::NoText(doc.id));
        }
        document_repo::set_extracted_text(&ctx.db, &doc.id, &text)?;
        run_repo::add_tokens(&ctx.db, &run.id, tokens_used)?;

        Ok(StageOutcome::Completed(json!({
            "source": source,
            "mimeType": mime_type,
            "characters": text.chars().count(),
            "tokensUsed": tokens_used,
        })))
    }
}
