//! In-process queue: one unbounded channel per stage.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};

use super::{JobEvent, JobFailure, JobQueue, QueueError};
use crate::pipeline::{JobOptions, QueuedJob, Stage, StageJob};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct FailedJobRecord {
    pub job_id: String,
    pub run_id: String,
    pub error: String,
    pub attempts_made: u32,
    pub failed_at: DateTime<Utc>,
}

/// Bounded per-stage record of finished jobs.
#[derive(Debug, Default)]
struct JobHistory {
    completed: VecDeque<String>,
    failed: VecDeque<FailedJobRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobHistorySnapshot {
    /// Completed job ids, oldest first.
    pub completed: Vec<String>,
    pub failed: Vec<FailedJobRecord>,
}

/// Receiving ends of the stage channels, handed to the worker pool, plus the
/// failure channel for the DLQ monitor.
pub struct QueueReceivers {
    receivers: HashMap<Stage, mpsc::UnboundedReceiver<QueuedJob>>,
    failures: Option<mpsc::UnboundedReceiver<JobFailure>>,
}

impl QueueReceivers {
    pub fn take(&mut self, stage: Stage) -> Option<mpsc::UnboundedReceiver<QueuedJob>> {
        self.receivers.remove(&stage)
    }

    /// Every failed attempt, in order. Unlike [`InProcessQueue::subscribe`]
    /// this channel never drops items when the reader falls behind.
    pub fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<JobFailure>> {
        self.failures.take()
    }
}

pub struct InProcessQueue {
    senders: HashMap<Stage, mpsc::UnboundedSender<QueuedJob>>,
    events: broadcast::Sender<JobEvent>,
    failures: mpsc::UnboundedSender<JobFailure>,
    history: Mutex<HashMap<Stage, JobHistory>>,
    /// Jobs enqueued or waiting for a retry and not yet finished.
    pending: AtomicUsize,
}

impl InProcessQueue {
    pub fn new() -> (Arc<Self>, QueueReceivers) {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for stage in Stage::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(stage, tx);
            receivers.insert(stage, rx);
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (failures, failures_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            senders,
            events,
            failures,
            history: Mutex::new(HashMap::new()),
            pending: AtomicUsize::new(0),
        });
        let receivers = QueueReceivers {
            receivers,
            failures: Some(failures_rx),
        };
        (queue, receivers)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Number of jobs not yet finished, retries included.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits until no job is queued, running or scheduled for retry.
    ///
    /// Returns false if `timeout` elapses first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.pending() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    pub fn history(&self, stage: Stage) -> JobHistorySnapshot {
        let guard = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .get(&stage)
            .map(|h| JobHistorySnapshot {
                completed: h.completed.iter().cloned().collect(),
                failed: h.failed.iter().cloned().collect(),
            })
            .unwrap_or_default()
    }

    fn send(&self, job: QueuedJob) -> Result<(), QueueError> {
        let queue_name = job.queue_name();
        let sender = self
            .senders
            .get(&job.stage)
            .ok_or_else(|| QueueError::Closed(queue_name.clone()))?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        sender.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            QueueError::Closed(queue_name)
        })
    }

    fn with_history(&self, stage: Stage, f: impl FnOnce(&mut JobHistory)) {
        let mut guard = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(guard.entry(stage).or_default());
    }

    /// Records the outcome of one attempt of `job`.
    ///
    /// A failed attempt with attempts left is re-sent after the job's backoff
    /// delay. Every failed attempt goes to the failure channel and is also
    /// broadcast as [`JobEvent::Failed`].
    pub fn finish(self: &Arc<Self>, mut job: QueuedJob, outcome: Result<(), String>) {
        job.attempts_made += 1;
        match outcome {
            Ok(()) => {
                let keep = job.options.keep_completed;
                self.with_history(job.stage, |h| {
                    h.completed.push_back(job.id.clone());
                    while h.completed.len() > keep {
                        h.completed.pop_front();
                    }
                });
                let _ = self.events.send(JobEvent::Completed {
                    job_id: job.id.clone(),
                    stage: job.stage,
                    data: job.data.clone(),
                });
            }
            Err(error) => {
                let failure = JobFailure {
                    job_id: job.id.clone(),
                    stage: job.stage,
                    data: job.data.clone(),
                    error: error.clone(),
                    attempts_made: job.attempts_made,
                    max_attempts: job.options.attempts,
                };
                if failure.is_final() {
                    let keep = job.options.keep_failed;
                    self.with_history(job.stage, |h| {
                        h.failed.push_back(FailedJobRecord {
                            job_id: job.id.clone(),
                            run_id: job.data.pipeline_run_id.clone(),
                            error,
                            attempts_made: job.attempts_made,
                            failed_at: Utc::now(),
                        });
                        while h.failed.len() > keep {
                            h.failed.pop_front();
                        }
                    });
                } else {
                    let delay = job.options.backoff_for(job.attempts_made);
                    tracing::warn!(
                        queue = %job.queue_name(),
                        job_id = %job.id,
                        attempts_made = job.attempts_made,
                        delay_ms = delay.as_millis() as u64,
                        "Job attempt failed, retrying: {}",
                        failure.error
                    );
                    self.requeue_after(job, delay);
                }
                let _ = self.failures.send(failure.clone());
                let _ = self.events.send(JobEvent::Failed(failure));
            }
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Re-sends `job` once `delay` has passed.
    fn requeue_after(self: &Arc<Self>, job: QueuedJob, delay: Duration) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let job_id = job.id.clone();
            let sent = queue.send(job);
            // Released only after the send holds its own slot.
            queue.pending.fetch_sub(1, Ordering::SeqCst);
            if let Err(e) = sent {
                tracing::error!(job_id = %job_id, "Failed to requeue job: {}", e);
            }
        });
    }
}

#[async_trait]
impl JobQueue for InProcessQueue {
    async fn enqueue(&self, stage: Stage, data: StageJob, options: JobOptions) -> Result<String, QueueError> {
        let job = QueuedJob::new(stage, data, options);
        let job_id = job.id.clone();
        tracing::debug!(queue = %job.queue_name(), job_id = %job_id, "Enqueued job");
        self.send(job)?;
        Ok(job_id)
    }
}
