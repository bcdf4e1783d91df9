use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, string_enum};
use crate::pipeline::stage::{RunState, Stage};

string_enum! {
    /// Overall status of a pipeline run.
    pub enum RunStatus {
        Queued => "queued",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

string_enum! {
    /// Status of a single stage within a run.
    pub enum StageStatusKind {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Skipped => "skipped",
        Failed => "failed",
    }
}

/// Bookkeeping for one stage of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStatus {
    pub status: StageStatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the stage short-circuited, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl StageStatus {
    pub fn running(now: DateTime<Utc>) -> Self {
        Self {
            status: StageStatusKind::Running,
            started_at: Some(now),
            completed_at: None,
            error: None,
            note: None,
        }
    }
}

/// One execution of the pipeline for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub id: String,
    pub firm_id: String,
    pub matter_id: String,
    pub document_id: String,
    pub status: RunStatus,
    pub current_stage: Option<Stage>,
    pub stage_statuses: BTreeMap<Stage, StageStatus>,
    pub document_hash: Option<String>,
    pub classified_doc_type: Option<String>,
    /// Stored as a three-decimal string, e.g. `"0.912"`.
    pub classification_confidence: Option<String>,
    pub taxonomy_pack_id: Option<String>,
    pub findings_count: i64,
    pub actions_count: i64,
    pub total_tokens_used: i64,
    pub error: Option<String>,
    pub triggered_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// A freshly queued run waiting for intake.
    pub fn new(
        firm_id: impl Into<String>,
        matter_id: impl Into<String>,
        document_id: impl Into<String>,
        triggered_by: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            firm_id: firm_id.into(),
            matter_id: matter_id.into(),
            document_id: document_id.into(),
            status: RunStatus::Queued,
            current_stage: None,
            stage_statuses: BTreeMap::new(),
            document_hash: None,
            classified_doc_type: None,
            classification_confidence: None,
            taxonomy_pack_id: None,
            findings_count: 0,
            actions_count: 0,
            total_tokens_used: 0,
            error: None,
            triggered_by,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Position of the run in the pipeline state machine.
    pub fn state(&self) -> RunState {
        match self.status {
            RunStatus::Completed => RunState::Completed,
            RunStatus::Failed => RunState::Failed,
            RunStatus::Cancelled => RunState::Cancelled,
            RunStatus::Queued | RunStatus::Running => {
                RunState::Stage(self.current_stage.unwrap_or(Stage::Intake))
            }
        }
    }

    pub fn stage_status(&self, stage: Stage) -> Option<&StageStatus> {
        self.stage_statuses.get(&stage)
    }
}
