use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{load_pack, StageOutcome, StageWorker};
use crate::db::{action_repo, finding_repo, matter_repo, run_repo};
use crate::model::{
    ActionType, FindingStatus, Impact, PipelineAction, PipelineFinding, PipelineRun,
};
use crate::pipeline::{Stage, StageError, StageJob, WorkerContext};
use crate::risk;
use crate::triggers;

/// Final stage: turns the run's findings into follow-up actions.
pub struct ActionsWorker;

#[async_trait]
impl StageWorker for ActionsWorker {
    fn stage(&self) -> Stage {
        Stage::Actions
    }

    async fn process(
        &self,
        ctx: &WorkerContext,
        job: &StageJob,
        run: &PipelineRun,
    ) -> Result<StageOutcome, StageError> {
        let findings = finding_repo::list_for_run(&ctx.db, &run.id)?;
        let pack = load_pack(ctx, job, run).await?;

        let mut actions = match &pack {
            Some(pack) => triggers::evaluate(
                pack.triggers(),
                &findings,
                &run.id,
                &run.matter_id,
                Utc::now().date_naive(),
            ),
            None => Vec::new(),
        };
        let triggered = actions.len();
        actions.extend(derived_actions(run, &findings));

        action_repo::replace_for_run(&ctx.db, &run.id, &actions)?;
        run_repo::set_actions_count(&ctx.db, &run.id, actions.len() as i64)?;

        Ok(StageOutcome::Completed(json!({
            "actions": actions.len(),
            "triggered": triggered,
        })))
    }

    async fn on_run_completed(&self, ctx: &WorkerContext, job: &StageJob) {
        if let Err(e) = recalculate_risk(ctx, &job.matter_id) {
            tracing::warn!(matter_id = %job.matter_id, "Failed to update matter risk: {}", e);
        }
    }
}

/// Actions that follow from finding state rather than pack triggers: one
/// risk flag per conflict, plus one review request covering every pending
/// critical finding.
fn derived_actions(run: &PipelineRun, findings: &[PipelineFinding]) -> Vec<PipelineAction> {
    let mut actions: Vec<PipelineAction> = findings
        .iter()
        .filter(|f| f.status == FindingStatus::Conflict)
        .map(|f| {
            let priority = match f.impact {
                Impact::Critical => 0,
                Impact::High => 1,
                _ => 2,
            };
            let mut action = PipelineAction::new(
                &run.id,
                &run.matter_id,
                ActionType::FlagRisk,
                format!("Conflicting value for {}", f.label),
                priority,
            );
            action.description = Some(format!(
                "Document states '{}' but the matter records '{}'.",
                f.value,
                f.existing_value.as_deref().unwrap_or_default()
            ));
            action.is_deterministic = true;
            action.trigger_finding_id = Some(f.id.clone());
            action.payload = json!({
                "categoryKey": f.category_key,
                "fieldKey": f.field_key,
                "value": f.value,
                "existingValue": f.existing_value,
            });
            action
        })
        .collect();

    let critical: Vec<&str> = findings
        .iter()
        .filter(|f| f.status == FindingStatus::Pending && f.impact == Impact::Critical)
        .map(|f| f.id.as_str())
        .collect();
    if !critical.is_empty() {
        let mut action = PipelineAction::new(
            &run.id,
            &run.matter_id,
            ActionType::RequestReview,
            format!("Review {} critical finding(s)", critical.len()),
            0,
        );
        action.is_deterministic = true;
        action.payload = json!({ "findingIds": critical });
        actions.push(action);
    }
    actions
}

fn recalculate_risk(ctx: &WorkerContext, matter_id: &str) -> Result<(), StageError> {
    let findings = finding_repo::list_for_matter(&ctx.db, matter_id)?;
    let assessment = risk::score(&findings);
    matter_repo::update_risk(&ctx.db, matter_id, &assessment)?;
    tracing::info!(matter_id, score = assessment.score, "Matter risk updated");
    Ok(())
}
