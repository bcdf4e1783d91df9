//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct wires a complete pipeline in a temp directory:
//! - In-memory SQLite database with migrations applied
//! - Filesystem blob store under the temp directory
//! - Scripted AI client and a static taxonomy loader
//! - In-process queue, worker pool and DLQ monitor, with short backoffs
//!
//! [`HarnessBuilder`] swaps in other sinks or shorter stage timeouts.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;

use lexflow::blob::FsBlobStore;
use lexflow::config::PipelineSettings;
use lexflow::db::{document_repo, matter_repo, run_repo, timeline_repo, Database};
use lexflow::dlq::{DlqMonitor, RingBufferDlq};
use lexflow::extractor::DocumentTextExtractor;
use lexflow::model::{DocumentRecord, PipelineRun};
use lexflow::pipeline::{Orchestrator, Stage, StageConfig, StageTable, WorkerContext};
use lexflow::queue::InProcessQueue;
use lexflow::sinks::{ReviewTaskSink, SqliteReviewTaskSink, SqliteTimelineSink, TimelineSink};
use lexflow::taxonomy::{StaticTaxonomyLoader, TaxonomyPack};
use lexflow::worker::{all_workers, WorkerPool};

use super::ai::{ScriptedAi, CLASSIFY_MODEL, EXTRACT_MODEL, VISION_MODEL};

pub const FIRM: &str = "firm-1";
const BUCKET: &str = "documents";
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

const STAGE_TIMEOUT_MS: u64 = 10_000;

/// Stage table with the default concurrency and attempts but millisecond
/// backoff, so retry paths finish quickly. `timeouts_ms` replaces the
/// attempt timeout of the stages it names.
pub fn fast_stage_table(timeouts_ms: &HashMap<Stage, u64>) -> StageTable {
    let overrides: HashMap<Stage, StageConfig> = Stage::ALL
        .into_iter()
        .map(|stage| {
            let base = StageConfig::default_for(stage);
            let timeout = timeouts_ms.get(&stage).copied().unwrap_or(STAGE_TIMEOUT_MS);
            (stage, StageConfig::new(base.concurrency, base.attempts, 10, timeout))
        })
        .collect();
    StageTable::with_overrides(&overrides)
}

/// Options for a [`TestHarness`] beyond the taxonomy pack.
pub struct HarnessBuilder {
    pack: TaxonomyPack,
    settings: PipelineSettings,
    timeouts_ms: HashMap<Stage, u64>,
    timeline: Option<Arc<dyn TimelineSink>>,
    review_tasks: Option<Arc<dyn ReviewTaskSink>>,
}

impl HarnessBuilder {
    pub fn settings(mut self, configure: impl FnOnce(&mut PipelineSettings)) -> Self {
        configure(&mut self.settings);
        self
    }

    pub fn stage_timeout_ms(mut self, stage: Stage, timeout_ms: u64) -> Self {
        self.timeouts_ms.insert(stage, timeout_ms);
        self
    }

    pub fn timeline(mut self, sink: Arc<dyn TimelineSink>) -> Self {
        self.timeline = Some(sink);
        self
    }

    pub fn review_tasks(mut self, sink: Arc<dyn ReviewTaskSink>) -> Self {
        self.review_tasks = Some(sink);
        self
    }

    pub async fn start(self) -> TestHarness {
        TestHarness::from_builder(self)
    }
}

/// A running pipeline over throwaway storage.
pub struct TestHarness {
    temp_dir: TempDir,
    pack_id: String,
    pub db: Database,
    pub blobs: FsBlobStore,
    pub ai: Arc<ScriptedAi>,
    pub queue: Arc<InProcessQueue>,
    pub orchestrator: Arc<Orchestrator>,
    pub dlq: Arc<DlqMonitor>,
    pool: WorkerPool,
    dlq_task: JoinHandle<()>,
}

impl TestHarness {
    /// Starts a pipeline whose every matter uses `pack`.
    pub async fn start(pack: TaxonomyPack) -> Self {
        Self::with_settings(pack, |_| {}).await
    }

    /// Like [`start`](Self::start), with a hook to adjust settings first.
    pub async fn with_settings(
        pack: TaxonomyPack,
        configure: impl FnOnce(&mut PipelineSettings),
    ) -> Self {
        Self::builder(pack).settings(configure).start().await
    }

    pub fn builder(pack: TaxonomyPack) -> HarnessBuilder {
        let mut settings = PipelineSettings::default();
        settings.ai.classification_model = CLASSIFY_MODEL.to_string();
        settings.ai.extraction_model = EXTRACT_MODEL.to_string();
        settings.ai.vision_model = VISION_MODEL.to_string();
        HarnessBuilder {
            pack,
            settings,
            timeouts_ms: HashMap::new(),
            timeline: None,
            review_tasks: None,
        }
    }

    fn from_builder(builder: HarnessBuilder) -> Self {
        let HarnessBuilder {
            pack,
            settings,
            timeouts_ms,
            timeline,
            review_tasks,
        } = builder;
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_in_memory().expect("Failed to open database");
        let blobs = FsBlobStore::new(temp_dir.path().join("blobs"));

        let pack_id = pack.id.clone();
        let taxonomy = StaticTaxonomyLoader::new()
            .with_pack(pack)
            .expect("Test pack must be valid")
            .with_default(pack_id.clone());

        let stages = fast_stage_table(&timeouts_ms);
        let (queue, mut receivers) = InProcessQueue::new();
        let failures = receivers
            .take_failures()
            .expect("Failure channel already taken");
        let orchestrator = Arc::new(Orchestrator::new(db.clone(), queue.clone(), stages.clone()));
        let ai = Arc::new(ScriptedAi::new());
        let timeline: Arc<dyn TimelineSink> = match timeline {
            Some(sink) => sink,
            None => Arc::new(SqliteTimelineSink::new(db.clone())),
        };
        let review_tasks: Arc<dyn ReviewTaskSink> = match review_tasks {
            Some(sink) => sink,
            None => Arc::new(SqliteReviewTaskSink::new(db.clone())),
        };

        let ctx = WorkerContext {
            db: db.clone(),
            orchestrator: Arc::clone(&orchestrator),
            ai: ai.clone(),
            blobs: Arc::new(blobs.clone()),
            taxonomy: Arc::new(taxonomy),
            extractor: Arc::new(DocumentTextExtractor::new()),
            timeline: Arc::clone(&timeline),
            review_tasks,
            settings: Arc::new(settings.clone()),
        };

        let dlq = Arc::new(DlqMonitor::new(
            Arc::new(RingBufferDlq::new(settings.dlq.capacity)),
            db.clone(),
            stages.clone(),
            timeline,
        ));
        let pool = WorkerPool::spawn(queue.clone(), receivers, all_workers(), ctx, &stages);
        let dlq_task = Arc::clone(&dlq).attach(failures, pool.shutdown_signal());

        Self {
            temp_dir,
            pack_id,
            db,
            blobs,
            ai,
            queue,
            orchestrator,
            dlq,
            pool,
            dlq_task,
        }
    }

    /// Inserts a matter bound to the harness pack.
    pub fn add_matter(&self, matter_id: &str) {
        matter_repo::insert(&self.db, matter_id, FIRM, Some(self.pack_id.as_str()))
            .expect("Failed to insert matter");
    }

    /// Uploads `bytes` and records a document with no extracted text.
    pub async fn add_document(&self, matter_id: &str, filename: &str, bytes: &[u8]) -> String {
        let doc = self.upload(matter_id, filename, bytes, None).await;
        doc.id
    }

    /// Uploads `bytes` and records a document whose text is already known.
    pub async fn add_document_with_text(
        &self,
        matter_id: &str,
        filename: &str,
        bytes: &[u8],
        text: &str,
    ) -> String {
        let doc = self
            .upload(matter_id, filename, bytes, Some(text.to_string()))
            .await;
        doc.id
    }

    /// Records a document whose blob was never uploaded.
    pub fn add_missing_document(&self, matter_id: &str, filename: &str) -> DocumentRecord {
        let doc = self.record(matter_id, filename, None);
        document_repo::insert(&self.db, &doc).expect("Failed to insert document");
        doc
    }

    async fn upload(
        &self,
        matter_id: &str,
        filename: &str,
        bytes: &[u8],
        text: Option<String>,
    ) -> DocumentRecord {
        let doc = self.record(matter_id, filename, text);
        self.blobs
            .upload(&doc.storage_bucket, &doc.storage_path, bytes)
            .await
            .expect("Failed to upload blob");
        document_repo::insert(&self.db, &doc).expect("Failed to insert document");
        doc
    }

    fn record(&self, matter_id: &str, filename: &str, text: Option<String>) -> DocumentRecord {
        let id = uuid::Uuid::new_v4().to_string();
        DocumentRecord {
            storage_bucket: BUCKET.to_string(),
            storage_path: format!("{}/{}/{}", matter_id, id, filename),
            id,
            firm_id: FIRM.to_string(),
            matter_id: matter_id.to_string(),
            filename: filename.to_string(),
            mime_type: None,
            extracted_text: text,
        }
    }

    /// Submits a run for the document and waits for the queue to drain.
    pub async fn run(&self, matter_id: &str, document_id: &str) -> PipelineRun {
        let run = self
            .orchestrator
            .submit(FIRM, matter_id, document_id, Some("test".to_string()))
            .await
            .expect("Failed to submit run");
        self.settle().await;
        self.run_row(&run.id)
    }

    /// Waits until no job is queued, running or waiting for a retry.
    pub async fn settle(&self) {
        assert!(
            self.queue.wait_idle(SETTLE_TIMEOUT).await,
            "pipeline did not settle within {:?}",
            SETTLE_TIMEOUT
        );
    }

    /// Polls `check` until it holds; for effects applied off the job path,
    /// like the DLQ monitor's.
    pub async fn eventually(&self, mut check: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
        while !check() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not met within {:?}",
                SETTLE_TIMEOUT
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn run_row(&self, run_id: &str) -> PipelineRun {
        run_repo::find_by_id(&self.db, run_id)
            .expect("Failed to load run")
            .expect("Run not found")
    }

    /// Timeline event types recorded for the matter, oldest first.
    pub fn timeline(&self, matter_id: &str) -> Vec<String> {
        timeline_repo::list_for_matter(&self.db, FIRM, matter_id)
            .expect("Failed to load timeline")
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    pub fn temp_path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    pub async fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait().await;
        let _ = self.dlq_task.await;
    }
}
