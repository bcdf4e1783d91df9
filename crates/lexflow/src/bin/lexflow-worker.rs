use std::path::PathBuf;
use std::sync::Arc;

use lexflow::ai::AiClient;
use lexflow::blob::{BlobStore, FsBlobStore};
use lexflow::config::{load_settings, PipelineSettings};
use lexflow::db::Database;
use lexflow::dlq::{DlqMonitor, RingBufferDlq};
use lexflow::error::LexflowError;
use lexflow::extractor::DocumentTextExtractor;
use lexflow::pipeline::{Orchestrator, WorkerContext};
use lexflow::queue::{InProcessQueue, QueueError};
use lexflow::sinks::{SqliteReviewTaskSink, SqliteTimelineSink, TimelineSink};
use lexflow::taxonomy::{FileTaxonomyLoader, StaticTaxonomyLoader, TaxonomyLoader};
use lexflow::worker::{all_workers, WorkerPool};
use lexflow::{logging, HttpAiClient};

const SETTINGS_ENV_VAR: &str = "LEXFLOW_SETTINGS";

fn settings_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(SETTINGS_ENV_VAR).map(PathBuf::from))
}

fn load() -> Result<PipelineSettings, LexflowError> {
    match settings_path() {
        Some(path) => Ok(load_settings(&path)?),
        None => Ok(PipelineSettings::default()),
    }
}

#[tokio::main]
async fn main() {
    let settings = match load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("lexflow-worker: {}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = logging::init(&settings.logging) {
        eprintln!("lexflow-worker: {}", e);
        std::process::exit(2);
    }
    if let Err(e) = run(settings).await {
        tracing::error!("Worker exited with error: {}", e);
        std::process::exit(1);
    }
}

async fn run(settings: PipelineSettings) -> Result<(), LexflowError> {
    tracing::info!("Starting lexflow worker v{}", env!("CARGO_PKG_VERSION"));

    let db_path = settings.database_path().ok_or_else(|| {
        lexflow::ConfigError::Validation {
            message: "no database path configured and no home directory found".to_string(),
        }
    })?;
    let db = Database::open(&db_path)?;
    let stages = settings.stage_table()?;

    let ai: Arc<dyn AiClient> = Arc::new(HttpAiClient::with_base_url(
        settings.ai.resolve_api_key()?,
        settings.ai.base_url.clone(),
    )?);
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&settings.blob_root));
    let taxonomy: Arc<dyn TaxonomyLoader> = match &settings.taxonomy_directory {
        Some(directory) => Arc::new(FileTaxonomyLoader::new(
            directory,
            db.clone(),
            settings.default_taxonomy_pack.clone(),
            settings.taxonomy_cache_ttl(),
        )),
        None => {
            tracing::warn!("No taxonomy directory configured; classification and extraction will be skipped");
            Arc::new(StaticTaxonomyLoader::new())
        }
    };

    let (queue, mut receivers) = InProcessQueue::new();
    let failures = receivers
        .take_failures()
        .ok_or_else(|| QueueError::Closed("failures".to_string()))?;
    let orchestrator = Arc::new(Orchestrator::new(db.clone(), queue.clone(), stages.clone()));

    let timeline: Arc<dyn TimelineSink> = Arc::new(SqliteTimelineSink::new(db.clone()));
    let ctx = WorkerContext {
        db: db.clone(),
        orchestrator: Arc::clone(&orchestrator),
        ai,
        blobs,
        taxonomy,
        extractor: Arc::new(DocumentTextExtractor::new()),
        timeline: Arc::clone(&timeline),
        review_tasks: Arc::new(SqliteReviewTaskSink::new(db.clone())),
        settings: Arc::new(settings.clone()),
    };

    let monitor = Arc::new(DlqMonitor::new(
        Arc::new(RingBufferDlq::new(settings.dlq.capacity)),
        db.clone(),
        stages.clone(),
        timeline,
    ));
    let pool = WorkerPool::spawn(queue.clone(), receivers, all_workers(), ctx, &stages);
    let dlq_task = Arc::clone(&monitor).attach(failures, pool.shutdown_signal());

    let resumed = orchestrator.resume_incomplete().await?;
    if resumed > 0 {
        tracing::info!("Resumed {} unfinished pipeline runs", resumed);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }

    pool.shutdown();
    pool.wait().await;
    if let Err(e) = dlq_task.await {
        tracing::warn!("DLQ monitor task failed: {}", e);
    }
    let dead = monitor.counts();
    if !dead.is_empty() {
        tracing::warn!(?dead, "Dead-lettered jobs at shutdown");
    }
    tracing::info!("lexflow worker stopped");
    Ok(())
}
