use std::fmt::Write as _;

use async_trait::async_trait;
use serde_json::json;

use super::{call_budget, document_text, StageOutcome, StageWorker};
use crate::ai::decode::decode_classification;
use crate::ai::AiRequest;
use crate::db::run_repo;
use crate::model::PipelineRun;
use crate::pipeline::{Stage, StageError, StageJob, WorkerContext};
use crate::sanitize::{sanitize_for_prompt, truncate_chars};
use crate::sinks::ReviewTaskRequest;
use crate::taxonomy::LoadedPack;

const CLASSIFY_SYSTEM: &str = "You classify legal documents for a law firm's matter \
management system. Answer with a single JSON object and nothing else.";

/// Picks the document type from the matter's taxonomy pack.
pub struct ClassifyWorker;

#[async_trait]
impl StageWorker for ClassifyWorker {
    fn stage(&self) -> Stage {
        Stage::Classify
    }

    async fn process(
        &self,
        ctx: &WorkerContext,
        job: &StageJob,
        run: &PipelineRun,
    ) -> Result<StageOutcome, StageError> {
        let Some(pack) = ctx
            .taxonomy
            .load_pack_for_matter(&job.firm_id, &job.matter_id)
            .await?
        else {
            return Ok(StageOutcome::Skipped("no taxonomy pack for matter".to_string()));
        };
        if pack.document_types().is_empty() {
            return Ok(StageOutcome::Skipped(format!(
                "taxonomy pack '{}' defines no document types",
                pack.id()
            )));
        }

        let text = document_text(ctx, job)?;
        let settings = &ctx.settings.classification;
        let sample = sanitize_for_prompt(truncate_chars(&text, settings.sample_chars));
        let budget = call_budget(ctx, Stage::Classify);

        let request = AiRequest::new(
            &ctx.settings.ai.classification_model,
            build_prompt(&pack, &sample),
        )
        .with_system(CLASSIFY_SYSTEM)
        .json()
        .with_max_tokens(settings.max_tokens)
        .with_timeout(ctx.settings.ai.timeout())
        .with_max_retries(ctx.settings.ai.max_retries);

        let response = budget.call(&*ctx.ai, request, budget.remaining()).await?;
        let result = decode_classification(&response.content)?;

        if !pack.document_types().iter().any(|dt| dt.key == result.document_type) {
            tracing::warn!(
                document_type = %result.document_type,
                "Classifier returned a type the pack does not define"
            );
        }

        if result.confidence < settings.low_confidence_threshold {
            let request = ReviewTaskRequest {
                firm_id: job.firm_id.clone(),
                matter_id: job.matter_id.clone(),
                run_id: run.id.clone(),
                document_id: job.document_id.clone(),
                title: "Confirm document classification".to_string(),
                description: Some(format!(
                    "Classified as '{}' with confidence {:.2}, below the review threshold of {:.2}.",
                    result.document_type, result.confidence, settings.low_confidence_threshold
                )),
            };
            if let Err(e) = ctx.review_tasks.create_review_task(request).await {
                tracing::warn!("Failed to create classification review task: {}", e);
            }
        }

        run_repo::set_classification(
            &ctx.db,
            &run.id,
            &result.document_type,
            result.confidence,
            pack.id(),
            response.tokens_used,
        )?;

        Ok(StageOutcome::Completed(json!({
            "documentType": result.document_type,
            "confidence": format!("{:.3}", result.confidence),
            "taxonomyPackId": pack.id(),
            "tokensUsed": response.tokens_used,
        })))
    }
}

fn build_prompt(pack: &LoadedPack, sample: &str) -> String {
    let mut prompt = String::from(
        "Classify the document below as exactly one of these document types:\n",
    );
    for doc_type in pack.document_types() {
        let _ = write!(prompt, "- {}: {}", doc_type.key, doc_type.label);
        if let Some(description) = &doc_type.description {
            let _ = write!(prompt, " ({})", description);
        }
        prompt.push('\n');
    }
    if let Some(extra) = &pack.prompt_templates().classification {
        prompt.push('\n');
        prompt.push_str(extra.trim());
        prompt.push('\n');
    }
    prompt.push_str(
        "\nRespond with JSON: {\"documentType\": \"<type key>\", \"confidence\": <number between 0 and 1>}\n\n",
    );
    let _ = write!(prompt, "<document>\n{}\n</document>", sample);
    prompt
}
