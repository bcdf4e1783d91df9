//! Stage queues.
//!
//! The queue is transport only: it delivers jobs, retries failed attempts
//! with backoff and reports outcomes. The run row in the database decides
//! what a run's state is.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::pipeline::{JobOptions, Stage, StageJob};

pub use memory::{FailedJobRecord, InProcessQueue, JobHistorySnapshot, QueueReceivers};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue '{0}' is closed")]
    Closed(String),
}

/// Where the orchestrator puts stage jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job and returns its id.
    async fn enqueue(&self, stage: Stage, data: StageJob, options: JobOptions) -> Result<String, QueueError>;
}

/// A failed attempt, reported after every attempt rather than only the last.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub job_id: String,
    pub stage: Stage,
    pub data: StageJob,
    pub error: String,
    pub attempts_made: u32,
    pub max_attempts: u32,
}

impl JobFailure {
    pub fn is_final(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Completed {
        job_id: String,
        stage: Stage,
        data: StageJob,
    },
    Failed(JobFailure),
}
