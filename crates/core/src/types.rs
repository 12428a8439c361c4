//! Identifier aliases shared across the workspace.

/// Opaque, broker-assigned job identifier.
pub type JobId = String;

/// Correlates a job back to the higher-level unit of work that requested it.
pub type ExecutionId = String;
