//! Traits the orchestration layer consumes from a queue broker.
//!
//! The broker owns job storage, delivery, and event fan-out; everything here
//! is an interface boundary. The rest of the workspace never holds a direct
//! reference to the underlying connection, only to these trait objects.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use jobstream_core::types::JobId;
use tokio::sync::broadcast;

use crate::error::QueueError;
use crate::progress::JobProgress;
use crate::types::{JobData, JobOptions, JobOutcome, JobStatus, ProgressEvent};

/// Shared handle to a job owned by the broker.
pub type JobRef = Arc<dyn Job>;

/// A single job tracked by the broker.
///
/// The handle only references the job; state queries and mutations round-trip
/// to the broker and may race with a worker processing the job concurrently.
#[async_trait]
pub trait Job: Send + Sync {
    /// Broker-assigned identifier.
    fn id(&self) -> &JobId;

    /// Payload the job was enqueued with.
    fn data(&self) -> &JobData;

    /// Whether a worker is currently processing this job.
    async fn is_active(&self) -> Result<bool, QueueError>;

    /// Remove the job from the queue.
    ///
    /// Fails with [`QueueError::JobActive`] if a worker picked the job up in
    /// the meantime; callers must be prepared for that race.
    async fn remove(&self) -> Result<(), QueueError>;

    /// Publish a progress payload on this job's notification channel.
    async fn report_progress(&self, progress: &JobProgress) -> Result<(), QueueError>;
}

impl fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", self.id()).finish()
    }
}

/// Worker-side handler a queue delivers received jobs to.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Execute one job to completion and report its outcome.
    async fn process_job(&self, job: JobRef) -> Result<JobOutcome, QueueError>;
}

/// Operations the orchestration layer consumes from the broker.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Enqueue a job and return its handle.
    async fn add(
        &self,
        job_type: &str,
        data: JobData,
        options: JobOptions,
    ) -> Result<JobRef, QueueError>;

    /// Look up a job by identifier.
    async fn get_job(&self, id: &JobId) -> Result<Option<JobRef>, QueueError>;

    /// List jobs currently in any of the given states.
    async fn get_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<JobRef>, QueueError>;

    /// Register the worker-side handler for a job type.
    ///
    /// Up to `concurrency` jobs are delivered to the processor in parallel.
    async fn process(
        &self,
        job_type: &str,
        concurrency: usize,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<(), QueueError>;

    /// Stop job intake without aborting jobs already in flight.
    async fn pause(&self, local: bool, global: bool) -> Result<(), QueueError>;

    /// Liveness probe: round-trip to the broker.
    async fn ping(&self) -> Result<(), QueueError>;

    /// Subscribe to the broker's progress-notification stream.
    ///
    /// Events arrive in the order the broker emits them; no ordering is
    /// guaranteed relative to [`error_events`](Self::error_events).
    fn progress_events(&self) -> broadcast::Receiver<ProgressEvent>;

    /// Subscribe to the broker's error stream.
    fn error_events(&self) -> broadcast::Receiver<QueueError>;
}

impl fmt::Debug for dyn QueueClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueClient").finish_non_exhaustive()
    }
}

/// Builds a [`QueueClient`] from a validated namespace prefix.
///
/// Keeps connection construction out of the orchestration layer so the
/// transport can be swapped without touching it.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    /// Construct the client for the named queue.
    ///
    /// A broker that is currently unreachable must NOT fail this call: the
    /// client is constructed eagerly and connectivity failures surface later
    /// on [`QueueClient::error_events`], where the recovery logic rides out
    /// the outage. Errors here are reserved for conditions that can never
    /// self-heal, such as invalid connection parameters.
    async fn connect(
        &self,
        queue_name: &str,
        prefix: &str,
    ) -> Result<Arc<dyn QueueClient>, QueueError>;
}
