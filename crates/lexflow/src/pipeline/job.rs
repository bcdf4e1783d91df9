use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::stage::{Stage, StageConfig};

/// Completed jobs kept in a stage's history.
pub const KEEP_COMPLETED_JOBS: usize = 100;
/// Failed jobs kept in a stage's history.
pub const KEEP_FAILED_JOBS: usize = 500;

/// Payload carried by every stage job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageJob {
    pub pipeline_run_id: String,
    pub firm_id: String,
    pub matter_id: String,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
}

/// Queue options attached to a job when it is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub attempts: u32,
    pub backoff_delay: Duration,
    pub timeout: Duration,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl JobOptions {
    pub fn for_stage(config: &StageConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            backoff_delay: config.backoff_delay,
            timeout: config.timeout,
            keep_completed: KEEP_COMPLETED_JOBS,
            keep_failed: KEEP_FAILED_JOBS,
        }
    }

    /// Exponential delay before the attempt following `attempts_made`.
    pub fn backoff_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(16);
        self.backoff_delay.saturating_mul(1u32 << exponent)
    }
}

/// A job as it travels through a stage queue.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: String,
    pub stage: Stage,
    pub data: StageJob,
    pub options: JobOptions,
    /// Attempts already finished (successful or not).
    pub attempts_made: u32,
}

impl QueuedJob {
    pub fn new(stage: Stage, data: StageJob, options: JobOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stage,
            data,
            options,
            attempts_made: 0,
        }
    }

    pub fn queue_name(&self) -> String {
        self.stage.queue_name()
    }
}
