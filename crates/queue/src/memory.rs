//! In-process queue implementation.
//!
//! Backs the [`QueueClient`] boundary with tokio primitives: an unbounded
//! channel for pending jobs, a semaphore for worker concurrency, and
//! broadcast channels for the progress and error streams. Used by tests and
//! by the worker binary's local mode; it is not a production broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use jobstream_core::types::JobId;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock, Semaphore};

use crate::client::{Job, JobProcessor, JobRef, QueueClient, QueueConnector};
use crate::error::QueueError;
use crate::progress::{encode_progress, JobProgress};
use crate::types::{JobData, JobOptions, JobStatus, ProgressEvent};

/// Broadcast capacity for the progress and error streams.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type JobRegistry = RwLock<HashMap<JobId, Arc<MemoryJob>>>;

/// A job held by the in-process queue.
pub struct MemoryJob {
    id: JobId,
    data: JobData,
    options: JobOptions,
    status: RwLock<JobStatus>,
    removed: AtomicBool,
    registry: Weak<JobRegistry>,
    progress_tx: broadcast::Sender<ProgressEvent>,
}

impl MemoryJob {
    async fn set_status(&self, status: JobStatus) {
        *self.status.write().await = status;
    }

    async fn status(&self) -> JobStatus {
        *self.status.read().await
    }

    fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Job for MemoryJob {
    fn id(&self) -> &JobId {
        &self.id
    }

    fn data(&self) -> &JobData {
        &self.data
    }

    async fn is_active(&self) -> Result<bool, QueueError> {
        Ok(self.status().await == JobStatus::Active)
    }

    async fn remove(&self) -> Result<(), QueueError> {
        if self.is_removed() {
            return Err(QueueError::JobNotFound(self.id.clone()));
        }

        // Guard against the check-then-act race: a worker may have picked
        // the job up since the caller last looked.
        if self.status().await == JobStatus::Active {
            return Err(QueueError::JobActive(self.id.clone()));
        }

        self.removed.store(true, Ordering::Release);
        if let Some(registry) = self.registry.upgrade() {
            registry.write().await.remove(&self.id);
        }

        Ok(())
    }

    async fn report_progress(&self, progress: &JobProgress) -> Result<(), QueueError> {
        // No subscribers is not an error; the other role may not be up yet.
        let _ = self.progress_tx.send(ProgressEvent {
            job_id: self.id.clone(),
            payload: encode_progress(progress),
        });
        Ok(())
    }
}

/// In-process [`QueueClient`].
///
/// A single instance is shared by the dispatcher and worker roles when both
/// run in one process.
pub struct MemoryQueue {
    prefix: String,
    next_id: AtomicU64,
    jobs: Arc<JobRegistry>,
    pending_tx: mpsc::UnboundedSender<Arc<MemoryJob>>,
    /// Taken exactly once by [`QueueClient::process`].
    pending_rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<MemoryJob>>>>,
    progress_tx: broadcast::Sender<ProgressEvent>,
    error_tx: broadcast::Sender<QueueError>,
    paused_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new(prefix: &str) -> Arc<Self> {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let (progress_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (error_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (paused_tx, _) = watch::channel(false);

        Arc::new(Self {
            prefix: prefix.to_string(),
            next_id: AtomicU64::new(1),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            pending_tx,
            pending_rx: Mutex::new(Some(pending_rx)),
            progress_tx,
            error_tx,
            paused_tx,
            closed: AtomicBool::new(false),
        })
    }

    /// Namespace prefix this queue was created with.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resume job intake after a [`QueueClient::pause`].
    pub fn resume(&self) {
        let _ = self.paused_tx.send(false);
    }

    /// Push an error onto the error stream, as a broker would.
    ///
    /// Test seam for driving the connection-recovery path.
    pub fn inject_error(&self, error: QueueError) {
        let _ = self.error_tx.send(error);
    }

    /// Stop accepting new jobs, as a broker does once its shutdown begins.
    ///
    /// Jobs already queued or in flight are unaffected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn add(
        &self,
        job_type: &str,
        data: JobData,
        options: JobOptions,
    ) -> Result<JobRef, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::NotAcceptingJobs);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();

        let job = Arc::new(MemoryJob {
            id: id.clone(),
            data,
            options,
            status: RwLock::new(JobStatus::Waiting),
            removed: AtomicBool::new(false),
            registry: Arc::downgrade(&self.jobs),
            progress_tx: self.progress_tx.clone(),
        });

        self.jobs.write().await.insert(id, Arc::clone(&job));

        tracing::debug!(job_id = %job.id, job_type, "Job enqueued");

        self.pending_tx
            .send(Arc::clone(&job))
            .map_err(|_| QueueError::Broker("queue dispatch channel closed".to_string()))?;

        Ok(job)
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<JobRef>, QueueError> {
        Ok(self
            .jobs
            .read()
            .await
            .get(id)
            .map(|job| Arc::clone(job) as JobRef))
    }

    async fn get_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<JobRef>, QueueError> {
        let snapshot: Vec<Arc<MemoryJob>> = self.jobs.read().await.values().cloned().collect();

        let mut matches = Vec::new();
        for job in snapshot {
            if statuses.contains(&job.status().await) {
                matches.push(job as JobRef);
            }
        }
        Ok(matches)
    }

    async fn process(
        &self,
        job_type: &str,
        concurrency: usize,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<(), QueueError> {
        let mut pending_rx = self
            .pending_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| QueueError::Broker("process() may only be called once".to_string()))?;

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut paused_rx = self.paused_tx.subscribe();
        let job_type = job_type.to_string();

        tokio::spawn(async move {
            tracing::debug!(job_type = %job_type, concurrency, "Worker dispatch loop started");

            while let Some(job) = pending_rx.recv().await {
                // Intake stops while paused; in-flight jobs keep running.
                if paused_rx.wait_for(|paused| !*paused).await.is_err() {
                    break;
                }

                if job.is_removed() || job.status().await != JobStatus::Waiting {
                    continue;
                }

                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                job.set_status(JobStatus::Active).await;
                let processor = Arc::clone(&processor);

                tokio::spawn(async move {
                    let job_ref: JobRef = Arc::clone(&job) as JobRef;
                    let succeeded = match processor.process_job(job_ref).await {
                        Ok(outcome) => outcome.success,
                        Err(e) => {
                            tracing::warn!(job_id = %job.id, error = %e, "Job handler failed");
                            false
                        }
                    };

                    let final_status = if succeeded {
                        JobStatus::Completed
                    } else {
                        JobStatus::Failed
                    };
                    job.set_status(final_status).await;

                    let discard = (succeeded && job.options.remove_on_complete)
                        || (!succeeded && job.options.remove_on_fail);
                    if discard {
                        if let Some(registry) = job.registry.upgrade() {
                            registry.write().await.remove(&job.id);
                        }
                    }

                    drop(permit);
                });
            }

            tracing::debug!("Worker dispatch loop exited");
        });

        Ok(())
    }

    async fn pause(&self, local: bool, global: bool) -> Result<(), QueueError> {
        // A single in-process queue has no local/global distinction; either
        // flag stops intake.
        if local || global {
            let _ = self.paused_tx.send(true);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }

    fn progress_events(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    fn error_events(&self) -> broadcast::Receiver<QueueError> {
        self.error_tx.subscribe()
    }
}

/// Hands out an already-constructed [`MemoryQueue`], letting both process
/// roles share one queue in tests and local runs.
pub struct MemoryConnector {
    queue: Arc<MemoryQueue>,
}

impl MemoryConnector {
    pub fn new(queue: Arc<MemoryQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl QueueConnector for MemoryConnector {
    async fn connect(
        &self,
        queue_name: &str,
        prefix: &str,
    ) -> Result<Arc<dyn QueueClient>, QueueError> {
        if prefix != self.queue.prefix() {
            return Err(QueueError::Connection(format!(
                "queue was created under prefix `{}`, not `{prefix}`",
                self.queue.prefix()
            )));
        }
        tracing::debug!(queue_name, prefix, "Connected to in-process queue");
        Ok(Arc::clone(&self.queue) as Arc<dyn QueueClient>)
    }
}
