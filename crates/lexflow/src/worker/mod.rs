//! Stage workers and the runtime that feeds them.
//!
//! A worker only does its stage's work. [`execute`] wraps it with the run
//! bookkeeping every stage shares: skipping closed runs, stage status,
//! timeline events, the failure policy and advancing to the next stage.

pub mod actions;
mod budget;
pub mod classify;
pub mod extract;
pub mod intake;
pub mod ocr;
pub mod pool;
pub mod reconcile;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::db::run_repo;
use crate::model::{PipelineRun, StageStatusKind};
use crate::pipeline::{
    advance, decide, PolicyDecision, Stage, StageError, StageJob, Transition, WorkerContext,
};
use crate::sinks::{TimelineEvent, TimelineEventKind};
use crate::taxonomy::LoadedPack;
use budget::CallBudget;

pub use actions::ActionsWorker;
pub use classify::ClassifyWorker;
pub use extract::ExtractWorker;
pub use intake::IntakeWorker;
pub use ocr::OcrWorker;
pub use pool::WorkerPool;
pub use reconcile::ReconcileWorker;

/// How a stage ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Work done; the detail goes to the timeline.
    Completed(Value),
    /// Nothing to do for this run; the reason is kept on the stage status.
    Skipped(String),
}

#[async_trait]
pub trait StageWorker: Send + Sync {
    fn stage(&self) -> Stage;

    async fn process(
        &self,
        ctx: &WorkerContext,
        job: &StageJob,
        run: &PipelineRun,
    ) -> Result<StageOutcome, StageError>;

    /// Called once the final stage has closed the run.
    async fn on_run_completed(&self, _ctx: &WorkerContext, _job: &StageJob) {}
}

/// One worker per stage, in stage order.
pub fn all_workers() -> Vec<Arc<dyn StageWorker>> {
    vec![
        Arc::new(IntakeWorker),
        Arc::new(OcrWorker),
        Arc::new(ClassifyWorker),
        Arc::new(ExtractWorker),
        Arc::new(ReconcileWorker),
        Arc::new(ActionsWorker),
    ]
}

/// Runs one attempt of a stage job.
///
/// An `Err` means the queue should retry the job; every other failure has
/// already been settled on the run row.
pub async fn execute(
    worker: &dyn StageWorker,
    ctx: &WorkerContext,
    job: &StageJob,
) -> Result<(), StageError> {
    let stage = worker.stage();
    let Some(run) = run_repo::find_by_id(&ctx.db, &job.pipeline_run_id)? else {
        tracing::warn!(stage = %stage, "Pipeline run not found, dropping job");
        return Ok(());
    };
    if run.state().is_terminal() {
        tracing::debug!(stage = %stage, status = %run.status, "Run is closed, dropping job");
        return Ok(());
    }
    if !run_repo::mark_stage_running(&ctx.db, &run.id, stage)? {
        tracing::debug!(stage = %stage, "Run closed before the stage started");
        return Ok(());
    }

    match worker.process(ctx, job, &run).await {
        Ok(StageOutcome::Completed(detail)) => {
            finish_stage(worker, ctx, job, StageStatusKind::Completed, None, detail).await
        }
        Ok(StageOutcome::Skipped(reason)) => {
            tracing::info!(stage = %stage, "Stage skipped: {}", reason);
            let detail = json!({ "reason": reason });
            finish_stage(worker, ctx, job, StageStatusKind::Skipped, Some(reason), detail).await
        }
        Err(error) => match decide(stage, error.kind()) {
            PolicyDecision::Retry => {
                tracing::warn!(stage = %stage, "Stage attempt failed: {}", error);
                Err(error)
            }
            PolicyDecision::FailRun => fail_run(ctx, job, stage, &error.to_string()).await,
            PolicyDecision::SkipStage | PolicyDecision::SkipChunk => {
                let reason = error.to_string();
                tracing::warn!(stage = %stage, "Stage degraded to skip: {}", reason);
                let detail = json!({ "reason": reason });
                finish_stage(worker, ctx, job, StageStatusKind::Skipped, Some(reason), detail).await
            }
        },
    }
}

async fn finish_stage(
    worker: &dyn StageWorker,
    ctx: &WorkerContext,
    job: &StageJob,
    status: StageStatusKind,
    note: Option<String>,
    detail: Value,
) -> Result<(), StageError> {
    let stage = worker.stage();
    run_repo::mark_stage_finished(&ctx.db, &job.pipeline_run_id, stage, status, note.as_deref())?;
    let kind = match status {
        StageStatusKind::Skipped => TimelineEventKind::StageSkipped,
        _ => TimelineEventKind::StageCompleted,
    };
    record(ctx, job, kind, Some(stage), detail).await;

    match advance(stage) {
        Transition::Next(_) => {
            ctx.orchestrator.advance_to_next_stage(stage, job).await?;
        }
        Transition::Terminal => {
            run_repo::mark_completed(&ctx.db, &job.pipeline_run_id)?;
            tracing::info!(run_id = %job.pipeline_run_id, "Pipeline run completed");
            record(
                ctx,
                job,
                TimelineEventKind::PipelineCompleted,
                None,
                json!({ "documentId": job.document_id }),
            )
            .await;
            worker.on_run_completed(ctx, job).await;
        }
    }
    Ok(())
}

/// Marks the run failed at `stage`. The job itself finishes normally.
async fn fail_run(
    ctx: &WorkerContext,
    job: &StageJob,
    stage: Stage,
    message: &str,
) -> Result<(), StageError> {
    tracing::warn!(stage = %stage, "Failing pipeline run: {}", message);
    if !run_repo::mark_failed(&ctx.db, &job.pipeline_run_id, Some(stage), message)? {
        return Ok(());
    }
    let detail = json!({ "error": message });
    record(ctx, job, TimelineEventKind::StageFailed, Some(stage), detail.clone()).await;
    record(ctx, job, TimelineEventKind::PipelineFailed, Some(stage), detail).await;
    Ok(())
}

/// Appends a timeline event; failures are logged only.
async fn record(
    ctx: &WorkerContext,
    job: &StageJob,
    kind: TimelineEventKind,
    stage: Option<Stage>,
    detail: Value,
) {
    let event = TimelineEvent {
        firm_id: job.firm_id.clone(),
        matter_id: job.matter_id.clone(),
        run_id: job.pipeline_run_id.clone(),
        kind,
        stage,
        detail,
    };
    if let Err(e) = ctx.timeline.append(event).await {
        tracing::warn!(event = kind.as_str(), "Failed to append timeline event: {}", e);
    }
}

/// Budget for the AI calls of one attempt at `stage`.
fn call_budget(ctx: &WorkerContext, stage: Stage) -> CallBudget {
    CallBudget::new(ctx.orchestrator.stages().get(stage).timeout)
}

/// The pack the run was classified against, else the matter's pack.
async fn load_pack(
    ctx: &WorkerContext,
    job: &StageJob,
    run: &PipelineRun,
) -> Result<Option<Arc<LoadedPack>>, StageError> {
    if let Some(pack_id) = run.taxonomy_pack_id.as_deref() {
        if let Some(pack) = ctx.taxonomy.load_pack_by_id(pack_id).await? {
            return Ok(Some(pack));
        }
    }
    Ok(ctx
        .taxonomy
        .load_pack_for_matter(&job.firm_id, &job.matter_id)
        .await?)
}

/// Extracted text of the job's document, or the matching input error.
fn document_text(ctx: &WorkerContext, job: &StageJob) -> Result<String, StageError> {
    let doc = crate::db::document_repo::find_by_id(&ctx.db, &job.document_id)?
        .ok_or_else(|| StageError::DocumentNotFound(job.document_id.clone()))?;
    match doc.extracted_text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(StageError::NoText(doc.id)),
    }
}
