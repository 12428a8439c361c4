//! Queue Client boundary for the jobstream workspace.
//!
//! Defines the traits the orchestration layer consumes from a queue broker
//! ([`client::QueueClient`], [`client::Job`], [`client::JobProcessor`]), the
//! job data model, and the progress-channel wire codec. The broker transport
//! itself is opaque to the rest of the workspace; [`memory::MemoryQueue`] is
//! the in-process implementation used by tests and local runs.

pub mod client;
pub mod error;
pub mod memory;
pub mod progress;
pub mod types;

pub use client::{Job, JobProcessor, JobRef, QueueClient, QueueConnector};
pub use error::QueueError;
pub use progress::{decode_progress, encode_progress, JobProgress, ProgressReport, ABORT_SIGNAL};
pub use types::{JobData, JobOptions, JobOutcome, JobStatus, ProgressEvent};
