//! Best-effort side channels: the matter timeline and human review tasks.
//!
//! Workers log and swallow errors from these sinks; they never fail a run.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::db::{task_repo, timeline_repo, Database, DatabaseError};
use crate::pipeline::Stage;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink storage error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineEventKind {
    StageCompleted,
    StageSkipped,
    StageFailed,
    PipelineCompleted,
    PipelineFailed,
}

impl TimelineEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineEventKind::StageCompleted => "stage.completed",
            TimelineEventKind::StageSkipped => "stage.skipped",
            TimelineEventKind::StageFailed => "stage.failed",
            TimelineEventKind::PipelineCompleted => "pipeline.completed",
            TimelineEventKind::PipelineFailed => "pipeline.failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub firm_id: String,
    pub matter_id: String,
    pub run_id: String,
    pub kind: TimelineEventKind,
    pub stage: Option<Stage>,
    pub detail: Value,
}

#[async_trait]
pub trait TimelineSink: Send + Sync {
    async fn append(&self, event: TimelineEvent) -> Result<(), SinkError>;
}

pub struct SqliteTimelineSink {
    db: Database,
}

impl SqliteTimelineSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TimelineSink for SqliteTimelineSink {
    async fn append(&self, event: TimelineEvent) -> Result<(), SinkError> {
        timeline_repo::append(
            &self.db,
            &event.firm_id,
            &event.matter_id,
            event.kind.as_str(),
            Some(&event.run_id),
            event.stage.map(|s| s.as_str()),
            &event.detail,
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewTaskRequest {
    pub firm_id: String,
    pub matter_id: String,
    pub run_id: String,
    pub document_id: String,
    pub title: String,
    pub description: Option<String>,
}

#[async_trait]
pub trait ReviewTaskSink: Send + Sync {
    /// Creates an open task and returns its id.
    async fn create_review_task(&self, request: ReviewTaskRequest) -> Result<String, SinkError>;
}

pub struct SqliteReviewTaskSink {
    db: Database,
}

impl SqliteReviewTaskSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReviewTaskSink for SqliteReviewTaskSink {
    async fn create_review_task(&self, request: ReviewTaskRequest) -> Result<String, SinkError> {
        let id = task_repo::insert(
            &self.db,
            &task_repo::NewReviewTask {
                firm_id: &request.firm_id,
                matter_id: &request.matter_id,
                run_id: Some(&request.run_id),
                document_id: Some(&request.document_id),
                title: &request.title,
                description: request.description.as_deref(),
            },
        )?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeline_sink_writes_event_type_and_stage() {
        let db = Database::open_in_memory().unwrap();
        let sink = SqliteTimelineSink::new(db.clone());
        sink.append(TimelineEvent {
            firm_id: "f1".into(),
            matter_id: "m1".into(),
            run_id: "r1".into(),
            kind: TimelineEventKind::StageSkipped,
            stage: Some(Stage::Classify),
            detail: serde_json::json!({"reason": "no taxonomy pack"}),
        })
        .await
        .unwrap();

        let events = timeline_repo::list_for_matter(&db, "f1", "m1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "stage.skipped");
        assert_eq!(events[0].stage.as_deref(), Some("classify"));
        assert_eq!(events[0].detail["reason"], "no taxonomy pack");
    }

    #[tokio::test]
    async fn test_review_task_sink() {
        let db = Database::open_in_memory().unwrap();
        let sink = SqliteReviewTaskSink::new(db.clone());
        let id = sink
            .create_review_task(ReviewTaskRequest {
                firm_id: "f1".into(),
                matter_id: "m1".into(),
                run_id: "r1".into(),
                document_id: "d1".into(),
                title: "Confirm document type".into(),
                description: Some("Classified as lease at 0.420".into()),
            })
            .await
            .unwrap();
        let tasks = task_repo::list_for_matter(&db, "m1").unwrap();
        assert_eq!(tasks[0].id, id);
        assert_eq!(tasks[0].document_id.as_deref(), Some("d1"));
    }
}
