//! Error type shared by all queue-boundary operations.

use jobstream_core::types::JobId;

/// Errors surfaced by a queue broker.
///
/// `Clone` so the same value can ride the broadcast error stream to every
/// subscriber. Classification of connection failures happens downstream by
/// pattern-matching the rendered message, the same way the broker reports
/// them on its error channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// The broker is unreachable or the connection dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A broker-side failure that is not a connectivity problem.
    #[error("Broker error: {0}")]
    Broker(String),

    /// The broker refused a new job, typically during its shutdown.
    #[error("Queue is not accepting new jobs")]
    NotAcceptingJobs,

    /// No job exists under the given identifier.
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// The job is currently being processed and cannot be removed.
    #[error("Job {0} is active and cannot be removed")]
    JobActive(JobId),
}
