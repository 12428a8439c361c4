//! Job data model shared between the dispatcher and worker roles.

use jobstream_core::types::{ExecutionId, JobId};
use serde::{Deserialize, Serialize};

/// Queryable lifecycle states of a job, as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, not yet picked up by a worker.
    Waiting,
    /// Currently being processed by a worker.
    Active,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Picked up by a worker that stopped reporting liveness.
    Stalled,
    /// Scheduled for a later time.
    Delayed,
}

/// Payload attached to a job when it is enqueued.
///
/// Every job must carry the execution identifier of the unit of work that
/// requested it; the rest of the payload is opaque to this layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    /// Correlates the job back to the requesting unit of work.
    pub execution_id: ExecutionId,
    /// Opaque payload interpreted only by the job executor.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Broker-specific scheduling hints supplied when enqueueing a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Higher values are dequeued first.
    pub priority: Option<i32>,
    /// Delete the job record once it completes successfully.
    pub remove_on_complete: bool,
    /// Delete the job record once it fails.
    pub remove_on_fail: bool,
}

/// Outcome a worker-side handler reports back through the queue's own
/// completion mechanism.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JobOutcome {
    pub success: bool,
}

/// A raw progress notification as delivered by the broker.
///
/// The payload is undecoded JSON; [`crate::progress::decode_progress`] turns
/// it into a typed [`crate::progress::JobProgress`] at the channel boundary.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// The job this notification belongs to.
    pub job_id: JobId,
    /// Raw JSON payload exactly as it crossed the wire.
    pub payload: serde_json::Value,
}
