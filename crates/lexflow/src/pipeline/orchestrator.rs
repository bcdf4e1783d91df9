use std::sync::Arc;

use crate::db::{run_repo, Database};
use crate::dlq::DlqEntry;
use crate::error::{LexflowError, Result};
use crate::model::{PipelineRun, RunStatus};
use crate::queue::{JobQueue, QueueError};

use super::job::{JobOptions, StageJob};
use super::stage::{advance, Stage, StageTable, Transition};

/// Moves runs between stage queues.
pub struct Orchestrator {
    db: Database,
    queue: Arc<dyn JobQueue>,
    stages: StageTable,
}

impl Orchestrator {
    pub fn new(db: Database, queue: Arc<dyn JobQueue>, stages: StageTable) -> Self {
        Self { db, queue, stages }
    }

    pub fn stages(&self) -> &StageTable {
        &self.stages
    }

    /// Enqueues the intake job for an existing run.
    pub async fn start_pipeline(&self, data: StageJob) -> std::result::Result<String, QueueError> {
        self.enqueue(Stage::Intake, data).await
    }

    /// Enqueues the stage after `current`. Returns `None` after the final stage.
    pub async fn advance_to_next_stage(
        &self,
        current: Stage,
        data: &StageJob,
    ) -> std::result::Result<Option<String>, QueueError> {
        match advance(current) {
            Transition::Next(next) => self.enqueue(next, data.clone()).await.map(Some),
            Transition::Terminal => Ok(None),
        }
    }

    /// Enqueues `stage` regardless of where the run currently is.
    pub async fn retry_from_stage(
        &self,
        stage: Stage,
        data: StageJob,
    ) -> std::result::Result<String, QueueError> {
        self.enqueue(stage, data).await
    }

    async fn enqueue(&self, stage: Stage, data: StageJob) -> std::result::Result<String, QueueError> {
        let options = JobOptions::for_stage(&self.stages.get(stage));
        let run_id = data.pipeline_run_id.clone();
        let job_id = self.queue.enqueue(stage, data, options).await?;
        tracing::debug!(
            queue = %stage.queue_name(),
            run_id = %run_id,
            job_id = %job_id,
            "Stage job enqueued"
        );
        Ok(job_id)
    }

    /// Creates a queued run for a document and enqueues its intake job.
    pub async fn submit(
        &self,
        firm_id: &str,
        matter_id: &str,
        document_id: &str,
        triggered_by: Option<String>,
    ) -> Result<PipelineRun> {
        let run = PipelineRun::new(firm_id, matter_id, document_id, triggered_by);
        run_repo::insert(&self.db, &run)?;
        self.start_pipeline(job_for(&run)).await?;
        tracing::info!(run_id = %run.id, document_id = %document_id, "Pipeline run submitted");
        Ok(run)
    }

    /// Cancels a run that has not finished. Queued jobs of a cancelled run
    /// are dropped by the workers.
    pub fn cancel(&self, run_id: &str) -> Result<bool> {
        let cancelled = run_repo::mark_cancelled(&self.db, run_id)?;
        if cancelled {
            tracing::info!(run_id = %run_id, "Pipeline run cancelled");
        }
        Ok(cancelled)
    }

    /// Reopens the failed run behind a dead-letter entry and re-enqueues the
    /// stage that failed.
    pub async fn recover(&self, entry: &DlqEntry) -> Result<String> {
        let run = run_repo::find_by_id(&self.db, &entry.run_id)?
            .ok_or_else(|| LexflowError::RunNotFound(entry.run_id.clone()))?;
        if run.status != RunStatus::Failed || !run_repo::reopen(&self.db, &run.id)? {
            return Err(LexflowError::NotRecoverable {
                run_id: run.id,
                status: run.status.to_string(),
            });
        }

        let job_id = self.retry_from_stage(entry.stage, job_for(&run)).await?;
        tracing::info!(run_id = %run.id, stage = %entry.stage, "Recovered dead-lettered run");
        Ok(job_id)
    }

    /// Re-enqueues every queued or running run at its current stage, e.g.
    /// after a restart. Returns how many runs were resumed.
    pub async fn resume_incomplete(&self) -> Result<usize> {
        let mut resumed = 0;
        for status in [RunStatus::Queued, RunStatus::Running] {
            for run in run_repo::list_by_status(&self.db, status)? {
                let stage = run.current_stage.unwrap_or(Stage::Intake);
                self.retry_from_stage(stage, job_for(&run)).await?;
                resumed += 1;
            }
        }
        if resumed > 0 {
            tracing::info!(resumed, "Resumed incomplete pipeline runs");
        }
        Ok(resumed)
    }
}

fn job_for(run: &PipelineRun) -> StageJob {
    StageJob {
        pipeline_run_id: run.id.clone(),
        firm_id: run.firm_id.clone(),
        matter_id: run.matter_id.clone(),
        document_id: run.document_id.clone(),
        triggered_by: run.triggered_by.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageConfig;
    use crate::queue::{InProcessQueue, QueueReceivers};
    use chrono::Utc;

    fn setup() -> (Orchestrator, Database, QueueReceivers) {
        let db = Database::open_in_memory().unwrap();
        let (queue, receivers) = InProcessQueue::new();
        let orchestrator = Orchestrator::new(db.clone(), queue, StageTable::default());
        (orchestrator, db, receivers)
    }

    #[tokio::test]
    async fn test_submit_creates_run_and_enqueues_intake() {
        let (orchestrator, db, mut receivers) = setup();
        let run = orchestrator
            .submit("firm-1", "matter-1", "doc-1", Some("user-1".into()))
            .await
            .unwrap();

        let stored = run_repo::find_by_id(&db, &run.id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Queued);

        let job = receivers.take(Stage::Intake).unwrap().recv().await.unwrap();
        assert_eq!(job.data.pipeline_run_id, run.id);
        assert_eq!(job.data.triggered_by.as_deref(), Some("user-1"));
        assert_eq!(job.options.attempts, StageConfig::default_for(Stage::Intake).attempts);
    }

    #[tokio::test]
    async fn test_advance_enqueues_next_stage_with_its_options() {
        let (orchestrator, _db, mut receivers) = setup();
        let data = StageJob {
            pipeline_run_id: "run-1".into(),
            firm_id: "firm-1".into(),
            matter_id: "matter-1".into(),
            document_id: "doc-1".into(),
            triggered_by: None,
        };

        let id = orchestrator
            .advance_to_next_stage(Stage::Classify, &data)
            .await
            .unwrap();
        assert!(id.is_some());
        let job = receivers.take(Stage::Extract).unwrap().recv().await.unwrap();
        assert_eq!(job.options.attempts, 2);

        let none = orchestrator
            .advance_to_next_stage(Stage::Actions, &data)
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_cancel_only_affects_open_runs() {
        let (orchestrator, db, _receivers) = setup();
        let run = orchestrator.submit("f", "m", "d", None).await.unwrap();
        assert!(orchestrator.cancel(&run.id).unwrap());
        assert!(!orchestrator.cancel(&run.id).unwrap());
        let stored = run_repo::find_by_id(&db, &run.id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_recover_reopens_failed_run() {
        let (orchestrator, db, mut receivers) = setup();
        let run = orchestrator.submit("f", "m", "d", None).await.unwrap();
        run_repo::mark_failed(&db, &run.id, Some(Stage::Ocr), "blob store down").unwrap();

        let entry = DlqEntry {
            job_id: "job-1".into(),
            stage: Stage::Ocr,
            run_id: run.id.clone(),
            matter_id: "m".into(),
            firm_id: "f".into(),
            error: "blob store down".into(),
            failed_at: Utc::now(),
            attempts_made: 3,
        };
        orchestrator.recover(&entry).await.unwrap();

        let stored = run_repo::find_by_id(&db, &run.id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert!(stored.error.is_none());
        let job = receivers.take(Stage::Ocr).unwrap().recv().await.unwrap();
        assert_eq!(job.data.document_id, "d");

        // A running run is not recoverable.
        assert!(matches!(
            orchestrator.recover(&entry).await,
            Err(LexflowError::NotRecoverable { .. })
        ));
    }

    #[tokio::test]
    async fn test_recover_unknown_run() {
        let (orchestrator, _db, _receivers) = setup();
        let entry = DlqEntry {
            job_id: "job-1".into(),
            stage: Stage::Intake,
            run_id: "nope".into(),
            matter_id: "m".into(),
            firm_id: "f".into(),
            error: "x".into(),
            failed_at: Utc::now(),
            attempts_made: 3,
        };
        assert!(matches!(
            orchestrator.recover(&entry).await,
            Err(LexflowError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_incomplete_requeues_at_current_stage() {
        let (orchestrator, db, mut receivers) = setup();
        let queued = orchestrator.submit("f", "m", "d1", None).await.unwrap();
        let running = orchestrator.submit("f", "m", "d2", None).await.unwrap();
        run_repo::mark_stage_running(&db, &running.id, Stage::Classify).unwrap();
        let done = orchestrator.submit("f", "m", "d3", None).await.unwrap();
        run_repo::mark_completed(&db, &done.id).unwrap();

        let mut intake = receivers.take(Stage::Intake).unwrap();
        for _ in 0..3 {
            intake.recv().await.unwrap();
        }

        assert_eq!(orchestrator.resume_incomplete().await.unwrap(), 2);
        let resumed = intake.recv().await.unwrap();
        assert_eq!(resumed.data.pipeline_run_id, queued.id);
        let classify = receivers.take(Stage::Classify).unwrap().recv().await.unwrap();
        assert_eq!(classify.data.pipeline_run_id, running.id);
    }
}
