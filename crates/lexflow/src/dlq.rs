//! Dead-letter monitoring.
//!
//! The monitor reads the queue's failure channel and records jobs that have
//! used up every attempt. Entries live in a bounded store next to, not
//! instead of, the durable run record.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::db::{run_repo, Database};
use crate::pipeline::{Stage, StageTable};
use crate::queue::JobFailure;
use crate::sinks::{TimelineEvent, TimelineEventKind, TimelineSink};

pub const DEFAULT_DLQ_CAPACITY: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqEntry {
    pub job_id: String,
    pub stage: Stage,
    pub run_id: String,
    pub matter_id: String,
    pub firm_id: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub attempts_made: u32,
}

impl DlqEntry {
    pub fn from_failure(failure: &JobFailure) -> Self {
        Self {
            job_id: failure.job_id.clone(),
            stage: failure.stage,
            run_id: failure.data.pipeline_run_id.clone(),
            matter_id: failure.data.matter_id.clone(),
            firm_id: failure.data.firm_id.clone(),
            error: failure.error.clone(),
            failed_at: Utc::now(),
            attempts_made: failure.attempts_made,
        }
    }
}

/// Storage for dead-lettered jobs.
pub trait DlqStore: Send + Sync {
    fn push(&self, entry: DlqEntry);

    /// Entries oldest first, optionally only those of `stage`.
    fn list(&self, stage: Option<Stage>) -> Vec<DlqEntry>;

    fn counts(&self) -> BTreeMap<Stage, usize>;

    /// Removes all entries, or those of `stage`, and returns how many went.
    fn clear(&self, stage: Option<Stage>) -> usize;
}

/// In-memory ring buffer; the oldest entry is dropped once full.
pub struct RingBufferDlq {
    capacity: usize,
    entries: Mutex<VecDeque<DlqEntry>>,
}

impl RingBufferDlq {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DlqEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for RingBufferDlq {
    fn default() -> Self {
        Self::new(DEFAULT_DLQ_CAPACITY)
    }
}

impl DlqStore for RingBufferDlq {
    fn push(&self, entry: DlqEntry) {
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    fn list(&self, stage: Option<Stage>) -> Vec<DlqEntry> {
        self.lock()
            .iter()
            .filter(|e| stage.map_or(true, |s| e.stage == s))
            .cloned()
            .collect()
    }

    fn counts(&self) -> BTreeMap<Stage, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.lock().iter() {
            *counts.entry(entry.stage).or_insert(0) += 1;
        }
        counts
    }

    fn clear(&self, stage: Option<Stage>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        match stage {
            Some(stage) => entries.retain(|e| e.stage != stage),
            None => entries.clear(),
        }
        before - entries.len()
    }
}

/// Watches every stage for exhausted jobs.
pub struct DlqMonitor {
    store: Arc<dyn DlqStore>,
    db: Database,
    stages: StageTable,
    timeline: Arc<dyn TimelineSink>,
}

impl DlqMonitor {
    pub fn new(
        store: Arc<dyn DlqStore>,
        db: Database,
        stages: StageTable,
        timeline: Arc<dyn TimelineSink>,
    ) -> Self {
        Self {
            store,
            db,
            stages,
            timeline,
        }
    }

    /// Handles one failed attempt. Returns true if the job was dead-lettered.
    pub async fn handle_failure(&self, failure: &JobFailure) -> bool {
        let max_attempts = self.stages.get(failure.stage).attempts;
        if failure.attempts_made < max_attempts {
            return false;
        }

        let entry = DlqEntry::from_failure(failure);
        tracing::error!(
            stage = %entry.stage,
            run_id = %entry.run_id,
            job_id = %entry.job_id,
            attempts_made = entry.attempts_made,
            "Job exhausted its retries: {}",
            entry.error
        );

        let message = format!(
            "Stage {} failed after {} attempts: {}",
            entry.stage, entry.attempts_made, entry.error
        );
        match run_repo::mark_failed(&self.db, &entry.run_id, Some(entry.stage), &message) {
            Ok(true) => self.record_failure(failure, &message).await,
            Ok(false) => tracing::debug!(run_id = %entry.run_id, "Run already terminal"),
            Err(e) => tracing::warn!(
                run_id = %entry.run_id,
                "Failed to mark dead-lettered run as failed: {}",
                e
            ),
        }

        self.store.push(entry);
        true
    }

    /// Appends `stage.failed` and `pipeline.failed`; errors are logged only.
    async fn record_failure(&self, failure: &JobFailure, message: &str) {
        let detail = json!({ "error": message, "attemptsMade": failure.attempts_made });
        for kind in [TimelineEventKind::StageFailed, TimelineEventKind::PipelineFailed] {
            let event = TimelineEvent {
                firm_id: failure.data.firm_id.clone(),
                matter_id: failure.data.matter_id.clone(),
                run_id: failure.data.pipeline_run_id.clone(),
                kind,
                stage: Some(failure.stage),
                detail: detail.clone(),
            };
            if let Err(e) = self.timeline.append(event).await {
                tracing::warn!(event = kind.as_str(), "Failed to append timeline event: {}", e);
            }
        }
    }

    /// Consumes failures until the channel closes or `shutdown` flips. Failures
    /// already queued at shutdown are still handled.
    pub fn attach(
        self: Arc<Self>,
        mut failures: mpsc::UnboundedReceiver<JobFailure>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    failure = failures.recv() => match failure {
                        Some(failure) => {
                            self.handle_failure(&failure).await;
                        }
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            while let Ok(failure) = failures.try_recv() {
                                self.handle_failure(&failure).await;
                            }
                            break;
                        }
                    }
                }
            }
            tracing::debug!("DLQ monitor stopped");
        })
    }

    pub fn list(&self, stage: Option<Stage>) -> Vec<DlqEntry> {
        self.store.list(stage)
    }

    pub fn counts(&self) -> BTreeMap<Stage, usize> {
        self.store.counts()
    }

    pub fn clear(&self, stage: Option<Stage>) -> usize {
        self.store.clear(stage)
    }
}
