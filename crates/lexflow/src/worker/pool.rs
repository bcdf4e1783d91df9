use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use super::{execute, StageWorker};
use crate::pipeline::{QueuedJob, Stage, StageTable, WorkerContext};
use crate::queue::memory::{InProcessQueue, QueueReceivers};

/// One dispatcher task per stage, each bounded by its stage's concurrency.
pub struct WorkerPool {
    dispatchers: Vec<(Stage, JoinHandle<()>)>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Starts a dispatcher for every worker whose stage has a receiver left.
    pub fn spawn(
        queue: Arc<InProcessQueue>,
        mut receivers: QueueReceivers,
        workers: Vec<Arc<dyn StageWorker>>,
        ctx: WorkerContext,
        stages: &StageTable,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut dispatchers = Vec::with_capacity(workers.len());

        for worker in workers {
            let stage = worker.stage();
            let Some(rx) = receivers.take(stage) else {
                tracing::warn!(stage = %stage, "No queue receiver for stage, worker not started");
                continue;
            };
            let concurrency = stages.get(stage).concurrency.max(1);
            let handle = tokio::spawn(dispatch(
                worker,
                rx,
                Arc::clone(&queue),
                ctx.clone(),
                concurrency,
                shutdown_rx.clone(),
            ));
            dispatchers.push((stage, handle));
        }

        tracing::info!("Started {} stage workers", dispatchers.len());
        Self {
            dispatchers,
            shutdown,
        }
    }

    /// Stops taking new jobs. Jobs already running are allowed to finish.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down worker pool...");
        self.shutdown.send_replace(true);
    }

    /// Receiver that flips to `true` once [`shutdown`](Self::shutdown) is called.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Waits for every dispatcher to drain its in-flight jobs and exit.
    pub async fn wait(self) {
        for (stage, handle) in self.dispatchers {
            match handle.await {
                Ok(()) => tracing::debug!(stage = %stage, "Stage worker finished"),
                Err(e) => tracing::error!(stage = %stage, "Stage worker panicked: {}", e),
            }
        }
        tracing::info!("All stage workers have stopped");
    }
}

async fn dispatch(
    worker: Arc<dyn StageWorker>,
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    queue: Arc<InProcessQueue>,
    ctx: WorkerContext,
    concurrency: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let stage = worker.stage();
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut running = JoinSet::new();
    tracing::debug!(stage = %stage, concurrency, "Stage worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(stage = %stage, "Stage job task failed: {}", e);
                }
            }
            job = rx.recv() => match job {
                Some(job) => {
                    let span = tracing::info_span!(
                        "stage_job",
                        stage = %stage,
                        run_id = %job.data.pipeline_run_id,
                        job_id = %job.id,
                        attempt = job.attempts_made + 1,
                    );
                    let worker = Arc::clone(&worker);
                    let queue = Arc::clone(&queue);
                    let permits = Arc::clone(&permits);
                    let ctx = ctx.clone();
                    running.spawn(
                        async move {
                            // Closed on shutdown: jobs still waiting are left
                            // for the next start to resume.
                            let Ok(_permit) = permits.acquire_owned().await else {
                                tracing::debug!("Worker pool shut down before the job started");
                                return;
                            };
                            let outcome = run_job(worker.as_ref(), &ctx, &job).await;
                            queue.finish(job, outcome);
                        }
                        .instrument(span),
                    );
                }
                None => break,
            },
        }
    }

    permits.close();
    while running.join_next().await.is_some() {}
    tracing::debug!(stage = %stage, "Stage worker stopped");
}

/// One attempt: bounded by the job timeout, panics caught and reported as
/// failures.
async fn run_job(
    worker: &dyn StageWorker,
    ctx: &WorkerContext,
    job: &QueuedJob,
) -> Result<(), String> {
    let attempt = tokio::time::timeout(job.options.timeout, execute(worker, ctx, &job.data));
    match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(e.to_string()),
        Ok(Err(_)) => {
            tracing::warn!(timeout_ms = job.options.timeout.as_millis() as u64, "Stage job timed out");
            Err(format!(
                "{} timed out after {:?}",
                job.queue_name(),
                job.options.timeout
            ))
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("Stage job panicked: {}", message);
            Err(format!("worker panicked: {}", message))
        }
    }
}
