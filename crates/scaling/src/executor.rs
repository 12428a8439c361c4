//! Collaborator seams around job execution and response waiting.
//!
//! The scaling service never executes a job payload itself; it delegates to
//! a [`JobExecutor`] and resolves waiting callers through a
//! [`ResponseWaiter`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use jobstream_core::types::{ExecutionId, JobId};
use jobstream_queue::{JobOutcome, JobProcessor, JobRef, QueueError};
use tokio::sync::oneshot;

use crate::webhook::WebhookResponse;

/// Executes job payloads and honours cooperative cancellation requests.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Perform the actual work for one job and report its outcome.
    async fn process_job(&self, job: JobRef) -> Result<JobOutcome, QueueError>;

    /// Ask the executor to stop a running job.
    ///
    /// Fire-and-forget and advisory: the executor decides how and when to
    /// actually stop. Unknown job ids are ignored.
    fn stop_job(&self, job_id: &JobId);
}

/// Holds pending in-flight response futures keyed by execution identifier.
pub trait ResponseWaiter: Send + Sync {
    /// Resolve the pending entry for `execution_id` with a response.
    ///
    /// A no-op when no entry exists — the original caller may have already
    /// given up.
    fn resolve(&self, execution_id: &str, response: WebhookResponse);
}

/// Adapts a [`JobExecutor`] to the queue's [`JobProcessor`] seam.
pub(crate) struct ExecutorProcessor(pub Arc<dyn JobExecutor>);

#[async_trait]
impl JobProcessor for ExecutorProcessor {
    async fn process_job(&self, job: JobRef) -> Result<JobOutcome, QueueError> {
        self.0.process_job(job).await
    }
}

/// Dispatcher-side [`ResponseWaiter`] backed by oneshot channels.
///
/// Callers [`register`](Self::register) an execution id before submitting
/// the job, then await the returned receiver; dropping the receiver cancels
/// the wait and later resolutions become no-ops.
#[derive(Default)]
pub struct InFlightResponses {
    pending: Mutex<HashMap<ExecutionId, oneshot::Sender<WebhookResponse>>>,
}

impl InFlightResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an execution id and obtain the future response.
    ///
    /// A second registration under the same id replaces the first; the
    /// earlier receiver resolves to an error.
    pub fn register(&self, execution_id: &str) -> oneshot::Receiver<WebhookResponse> {
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(execution_id.to_string(), tx);
        rx
    }

    /// Number of executions still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<ExecutionId, oneshot::Sender<WebhookResponse>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResponseWaiter for InFlightResponses {
    fn resolve(&self, execution_id: &str, response: WebhookResponse) {
        let Some(tx) = self.lock_pending().remove(execution_id) else {
            tracing::debug!(execution_id, "No pending response for execution");
            return;
        };

        // The receiver may have been dropped in the meantime; that is fine.
        let _ = tx.send(response);
    }
}
