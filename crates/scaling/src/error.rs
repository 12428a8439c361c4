//! Error taxonomy of the orchestration layer.

use jobstream_core::config::ConfigError;
use jobstream_queue::QueueError;

/// Errors surfaced by the scaling service.
///
/// Transient connection failures never appear here; they are logged and
/// absorbed by the recovery state machine. The fatal variants are delivered
/// to the supervisor via [`crate::service::ScalingService::fatal_events`]
/// so the decision to terminate stays outside business logic.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScalingError {
    /// A worker-only operation was invoked on a non-worker instance.
    /// A configuration/programming error, never retried.
    #[error("This operation may only be called on a `worker` instance")]
    RoleViolation,

    /// Job data did not carry an execution identifier.
    #[error("Job data is missing an execution identifier")]
    MissingExecutionId,

    /// An operation ran before `setup_queue()`.
    #[error("Queue has not been set up; call setup_queue() first")]
    QueueNotReady,

    /// The cumulative connection-outage budget was exceeded; the process
    /// must exit so an external supervisor can restart it.
    #[error("Broker unreachable past the cumulative outage budget ({outage_ms} ms)")]
    EscalatedConnectionFailure { outage_ms: u64 },

    /// The broker exhausted its own retry budget for a stalled job.
    /// Worker instances treat this as fatal.
    #[error("Broker stalled-job retry budget exhausted: {0}")]
    StalledJobBudgetExceeded(String),

    /// Broker-side initialization failed; a degraded initialization cannot
    /// self-heal, so worker instances must exit immediately.
    #[error("Fatal broker initialization failure: {0}")]
    FatalInitFailure(String),

    /// A broker error that matched no known class; surfaced to the
    /// supervisor rather than silently swallowed.
    #[error("Unclassified queue error: {0}")]
    UnclassifiedQueueError(String),

    /// Invalid configuration detected at setup time.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A queue operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),
}
