//! Names shared by every process attached to the same broker.

/// Name of the shared job queue.
pub const QUEUE_NAME: &str = "jobs";

/// The single job type this layer enqueues and processes.
pub const JOB_TYPE_NAME: &str = "job";
