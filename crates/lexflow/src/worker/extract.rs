use std::collections::HashMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{call_budget, document_text, load_pack, StageOutcome, StageWorker};
use crate::ai::decode::decode_findings;
use crate::ai::{AiRequest, RawFinding};
use crate::chunker::{self, TextChunk};
use crate::db::{finding_repo, run_repo};
use crate::model::{new_id, FindingStatus, Impact, PipelineFinding, PipelineRun};
use crate::pipeline::{decide, PolicyDecision, Stage, StageError, StageJob, WorkerContext};
use crate::sanitize::sanitize_for_prompt;
use crate::taxonomy::{Category, DataType, FieldDef, LoadedPack};

const EXTRACT_SYSTEM: &str = "You extract structured facts from legal documents. \
Only report values that appear in the text. Answer with JSON and nothing else.";

/// Pulls taxonomy fields out of the document text, one chunk at a time.
pub struct ExtractWorker;

#[async_trait]
impl StageWorker for ExtractWorker {
    fn stage(&self) -> Stage {
        Stage::Extract
    }

    async fn process(
        &self,
        ctx: &WorkerContext,
        job: &StageJob,
        run: &PipelineRun,
    ) -> Result<StageOutcome, StageError> {
        let Some(pack) = load_pack(ctx, job, run).await? else {
            return Ok(StageOutcome::Skipped("no taxonomy pack for matter".to_string()));
        };
        let categories = pack.active_categories(run.classified_doc_type.as_deref());
        if categories.iter().all(|c| c.fields.is_empty()) {
            return Ok(StageOutcome::Skipped(
                "no fields active for the document type".to_string(),
            ));
        }

        let text = document_text(ctx, job)?;
        let settings = &ctx.settings.extraction;
        let chunks = chunker::chunk(&text, settings.chunk_size, settings.chunk_overlap);
        let field_list = describe_fields(&categories);
        let budget = call_budget(ctx, Stage::Extract);

        let mut merged = FindingSet::default();
        let mut tokens_used = 0;
        let mut failed_chunks = 0;
        for (done, chunk) in chunks.iter().enumerate() {
            if budget.is_spent() {
                let left = chunks.len() - done;
                failed_chunks += left;
                tracing::warn!(
                    skipped = left,
                    chunks = chunks.len(),
                    "Stage time budget spent, skipping remaining extraction chunks"
                );
                break;
            }
            let request = AiRequest::new(
                &ctx.settings.ai.extraction_model,
                build_prompt(&pack, &field_list, chunk, chunks.len()),
            )
            .with_system(EXTRACT_SYSTEM)
            .json()
            .with_max_tokens(settings.max_tokens)
            .with_timeout(ctx.settings.ai.timeout())
            .with_max_retries(settings.chunk_max_retries);

            let allowance = budget.share(chunks.len() - done);
            let decoded = match budget.call(&*ctx.ai, request, allowance).await {
                Ok(response) => {
                    tokens_used += response.tokens_used;
                    decode_findings(&response.content).map_err(StageError::from)
                }
                Err(e) => Err(StageError::from(e)),
            };
            match decoded {
                Ok(raw) => {
                    for finding in raw {
                        merged.add(&pack, &categories, chunk, finding);
                    }
                }
                Err(error) => match decide(Stage::Extract, error.kind()) {
                    PolicyDecision::SkipChunk => {
                        failed_chunks += 1;
                        tracing::warn!(
                            chunk = chunk.index,
                            chunks = chunks.len(),
                            "Skipping extraction chunk: {}",
                            error
                        );
                    }
                    _ => return Err(error),
                },
            }
        }

        if !chunks.is_empty() && failed_chunks == chunks.len() {
            run_repo::add_tokens(&ctx.db, &run.id, tokens_used)?;
            return Err(StageError::AllChunksFailed(chunks.len()));
        }

        let findings = merged.into_findings(run);
        finding_repo::replace_for_run(&ctx.db, &run.id, &findings)?;
        run_repo::set_findings_count(&ctx.db, &run.id, findings.len() as i64, tokens_used)?;

        Ok(StageOutcome::Completed(json!({
            "findings": findings.len(),
            "chunks": chunks.len(),
            "failedChunks": failed_chunks,
            "tokensUsed": tokens_used,
        })))
    }
}

/// A finding candidate before it gets an id and a run.
struct Candidate {
    category_key: String,
    field_key: String,
    label: String,
    value: String,
    source_quote: Option<String>,
    page_number: Option<i64>,
    char_start: i64,
    char_end: i64,
    confidence: f64,
    impact: Impact,
}

/// Findings deduplicated by `(category, field, value)`, in first-seen order.
#[derive(Default)]
struct FindingSet {
    candidates: Vec<Candidate>,
    index: HashMap<(String, String, String), usize>,
}

impl FindingSet {
    fn add(&mut self, pack: &LoadedPack, active: &[&Category], chunk: &TextChunk, raw: RawFinding) {
        if !active.iter().any(|c| c.key == raw.category_key) {
            tracing::debug!(category = %raw.category_key, "Dropping finding outside active categories");
            return;
        }
        let Some(entry) = pack.field(&raw.category_key, &raw.field_key) else {
            tracing::debug!(
                category = %raw.category_key,
                field = %raw.field_key,
                "Dropping finding for unknown field"
            );
            return;
        };
        let value = raw.value.trim().to_string();
        if value.is_empty() {
            return;
        }

        let (char_start, char_end) = locate(chunk, raw.source_quote.as_deref());
        let candidate = Candidate {
            category_key: raw.category_key,
            field_key: raw.field_key,
            label: entry.field.label.clone(),
            value,
            source_quote: raw.source_quote,
            page_number: raw.page_number,
            char_start,
            char_end,
            confidence: raw.confidence,
            impact: impact_for(&entry.field),
        };

        let key = (
            candidate.category_key.clone(),
            candidate.field_key.clone(),
            candidate.value.clone(),
        );
        match self.index.get(&key) {
            Some(&i) => {
                if candidate.confidence > self.candidates[i].confidence {
                    self.candidates[i] = candidate;
                }
            }
            None => {
                self.index.insert(key, self.candidates.len());
                self.candidates.push(candidate);
            }
        }
    }

    fn into_findings(self, run: &PipelineRun) -> Vec<PipelineFinding> {
        let now = Utc::now();
        self.candidates
            .into_iter()
            .map(|c| PipelineFinding {
                id: new_id(),
                run_id: run.id.clone(),
                matter_id: run.matter_id.clone(),
                document_id: run.document_id.clone(),
                category_key: c.category_key,
                field_key: c.field_key,
                label: c.label,
                value: c.value,
                source_quote: c.source_quote,
                page_number: c.page_number,
                char_start: Some(c.char_start),
                char_end: Some(c.char_end),
                confidence: c.confidence,
                impact: c.impact,
                status: FindingStatus::Pending,
                existing_value: None,
                resolved_by: None,
                resolved_at: None,
                created_at: now,
            })
            .collect()
    }
}

/// Char span of the quote within the document, else the whole chunk.
fn locate(chunk: &TextChunk, quote: Option<&str>) -> (i64, i64) {
    let found = quote
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .and_then(|q| chunk.text.find(q).map(|byte| (byte, q)));
    match found {
        Some((byte, q)) => {
            let start = chunk.char_start + chunk.text[..byte].chars().count();
            (start as i64, (start + q.chars().count()) as i64)
        }
        None => (chunk.char_start as i64, chunk.char_end as i64),
    }
}

/// Impact of a finding from its field's metadata.
///
/// An explicit impact wins. Otherwise dates and money are high (critical when
/// the field also demands human review), parties and figures medium.
pub fn impact_for(field: &FieldDef) -> Impact {
    if let Some(impact) = field.impact {
        return impact;
    }
    match field.data_type {
        DataType::Date | DataType::Currency if field.requires_human_review => Impact::Critical,
        DataType::Date | DataType::Currency => Impact::High,
        DataType::Party | DataType::Number | DataType::Percentage => Impact::Medium,
        DataType::Boolean | DataType::Enum => Impact::Low,
        DataType::Text if field.requires_human_review => Impact::Medium,
        DataType::Text => Impact::Info,
    }
}

fn describe_fields(categories: &[&Category]) -> String {
    let mut out = String::new();
    for category in categories {
        if category.fields.is_empty() {
            continue;
        }
        let _ = writeln!(out, "Category `{}` ({}):", category.key, category.label);
        for field in &category.fields {
            let _ = write!(
                out,
                "  - `{}`: {} [{}]",
                field.key,
                field.label,
                field.data_type.as_str()
            );
            if !field.enum_values.is_empty() {
                let _ = write!(out, " one of: {}", field.enum_values.join(", "));
            }
            if let Some(description) = &field.description {
                let _ = write!(out, " ({})", description);
            }
            out.push('\n');
        }
    }
    out
}

fn build_prompt(pack: &LoadedPack, field_list: &str, chunk: &TextChunk, total: usize) -> String {
    let mut prompt = String::from("Extract the following fields from the document excerpt.\n\n");
    prompt.push_str(field_list);
    if let Some(extra) = &pack.prompt_templates().extraction {
        prompt.push('\n');
        prompt.push_str(extra.trim());
        prompt.push('\n');
    }
    prompt.push_str(
        "\nReturn a JSON array. Each element: {\"categoryKey\", \"fieldKey\", \"value\", \
\"sourceQuote\" (exact text supporting the value), \"pageNumber\" (if known), \
\"confidence\" (0 to 1)}. Return [] if no field is present.\n\n",
    );
    let _ = write!(
        prompt,
        "<document part=\"{} of {}\">\n{}\n</document>",
        chunk.index + 1,
        total,
        sanitize_for_prompt(&chunk.text)
    );
    prompt
}
