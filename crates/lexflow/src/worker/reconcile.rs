use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{load_pack, StageOutcome, StageWorker};
use crate::db::finding_repo::{self, FindingResolution};
use crate::model::PipelineRun;
use crate::pipeline::{Stage, StageError, StageJob, WorkerContext};
use crate::reconcile::reconcile;

/// Compares new findings against the matter's established values.
pub struct ReconcileWorker;

#[async_trait]
impl StageWorker for ReconcileWorker {
    fn stage(&self) -> Stage {
        Stage::Reconcile
    }

    async fn process(
        &self,
        ctx: &WorkerContext,
        job: &StageJob,
        run: &PipelineRun,
    ) -> Result<StageOutcome, StageError> {
        let pending = finding_repo::pending_for_run(&ctx.db, &run.id)?;
        if pending.is_empty() {
            return Ok(StageOutcome::Completed(json!({ "reconciled": 0 })));
        }

        // Without a pack every field falls back to the default rule.
        let pack = load_pack(ctx, job, run).await?;
        let established = finding_repo::latest_established_values(&ctx.db, &run.matter_id, &run.id)?;
        let threshold = ctx.settings.reconciliation.auto_apply_threshold;
        let now = Utc::now();

        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        let resolutions: Vec<FindingResolution> = pending
            .iter()
            .map(|finding| {
                let rule = pack.as_ref().and_then(|p| p.rule_for(&finding.field_key));
                let existing = established.get(&finding.qualified_key()).map(String::as_str);
                let outcome = reconcile(&finding.value, existing, finding.confidence, rule, threshold);
                *counts.entry(outcome.status.as_str()).or_default() += 1;
                FindingResolution {
                    finding_id: finding.id.clone(),
                    status: outcome.status,
                    resolved_at: outcome.is_resolved().then_some(now),
                    existing_value: outcome.existing_value,
                }
            })
            .collect();

        finding_repo::apply_resolutions(&ctx.db, &resolutions)?;
        tracing::debug!(findings = resolutions.len(), ?counts, "Findings reconciled");

        Ok(StageOutcome::Completed(json!({
            "reconciled": resolutions.len(),
            "statuses": counts,
        })))
    }
}
