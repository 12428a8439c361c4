//! Orchestration layer between a queue broker and the rest of the
//! application.
//!
//! [`service::ScalingService`] owns the process-wide queue connection and
//! exposes the job lifecycle operations; [`recovery`] classifies broker
//! errors into retry/escalate decisions; [`dispatcher`] fans progress
//! notifications out to the response waiter and the job executor; and
//! [`webhook`] unpacks binary response bodies that travelled through the
//! JSON-only progress channel.

pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod recovery;
pub mod service;
pub mod webhook;

pub use error::ScalingError;
pub use executor::{InFlightResponses, JobExecutor, ResponseWaiter};
pub use service::ScalingService;
pub use webhook::WebhookResponse;
