//! Progress dispatcher.
//!
//! One subscription to the broker's progress-notification stream, fanned out
//! two ways: webhook-response reports resolve the response waiter's pending
//! entry, and the abort sentinel is forwarded to the job executor's
//! cooperative-cancellation entry point. The payload is decoded into a
//! tagged union exactly once, at the channel boundary.

use std::sync::Arc;

use jobstream_queue::{decode_progress, JobProgress, ProgressEvent, ProgressReport};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::executor::{JobExecutor, ResponseWaiter};
use crate::webhook::decode_response;

/// Spawn the listener task consuming the progress stream.
///
/// Runs until the stream closes or `cancel` is triggered.
pub(crate) fn spawn_progress_dispatcher(
    mut progress_rx: broadcast::Receiver<ProgressEvent>,
    executor: Arc<dyn JobExecutor>,
    waiter: Arc<dyn ResponseWaiter>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = progress_rx.recv() => match event {
                    Ok(event) => handle_progress_event(&event, executor.as_ref(), waiter.as_ref()),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Progress stream lagged, notifications dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        tracing::debug!("Progress dispatcher exited");
    })
}

/// Route a single decoded progress event.
pub(crate) fn handle_progress_event(
    event: &ProgressEvent,
    executor: &dyn JobExecutor,
    waiter: &dyn ResponseWaiter,
) {
    match decode_progress(&event.payload) {
        Some(JobProgress::Report(ProgressReport::WebhookResponse {
            execution_id,
            response,
        })) => {
            waiter.resolve(&execution_id, decode_response(response));
        }
        Some(JobProgress::Abort) => {
            // Advisory; the executor decides how and when to stop the job.
            executor.stop_job(&event.job_id);
        }
        None => {
            // Other tooling may share the channel; not an error.
            tracing::debug!(job_id = %event.job_id, "Ignoring unrecognised progress payload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobstream_core::types::JobId;
    use jobstream_queue::{encode_progress, JobOutcome, JobRef, QueueError};
    use serde_json::json;
    use std::sync::Mutex;

    use crate::webhook::WebhookResponse;

    #[derive(Default)]
    struct RecordingExecutor {
        stopped: Mutex<Vec<JobId>>,
    }

    #[async_trait]
    impl JobExecutor for RecordingExecutor {
        async fn process_job(&self, _job: JobRef) -> Result<JobOutcome, QueueError> {
            Ok(JobOutcome { success: true })
        }

        fn stop_job(&self, job_id: &JobId) {
            self.stopped.lock().unwrap().push(job_id.clone());
        }
    }

    #[derive(Default)]
    struct RecordingWaiter {
        resolved: Mutex<Vec<(String, WebhookResponse)>>,
    }

    impl ResponseWaiter for RecordingWaiter {
        fn resolve(&self, execution_id: &str, response: WebhookResponse) {
            self.resolved
                .lock()
                .unwrap()
                .push((execution_id.to_string(), response));
        }
    }

    fn event(payload: serde_json::Value) -> ProgressEvent {
        ProgressEvent {
            job_id: "7".to_string(),
            payload,
        }
    }

    #[test]
    fn webhook_report_resolves_exactly_that_execution() {
        let executor = RecordingExecutor::default();
        let waiter = RecordingWaiter::default();

        let payload = encode_progress(&JobProgress::Report(ProgressReport::WebhookResponse {
            execution_id: "E1".into(),
            response: json!({"status": 200}),
        }));
        handle_progress_event(&event(payload), &executor, &waiter);

        let resolved = waiter.resolved.lock().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, "E1");
        assert_eq!(
            resolved[0].1,
            WebhookResponse::Json(json!({"status": 200}))
        );
        assert!(executor.stopped.lock().unwrap().is_empty());
    }

    #[test]
    fn abort_sentinel_stops_the_job_and_never_resolves() {
        let executor = RecordingExecutor::default();
        let waiter = RecordingWaiter::default();

        handle_progress_event(
            &event(encode_progress(&JobProgress::Abort)),
            &executor,
            &waiter,
        );

        assert_eq!(*executor.stopped.lock().unwrap(), vec!["7".to_string()]);
        assert!(waiter.resolved.lock().unwrap().is_empty());
    }

    #[test]
    fn unrecognised_payload_is_ignored() {
        let executor = RecordingExecutor::default();
        let waiter = RecordingWaiter::default();

        handle_progress_event(&event(json!(42)), &executor, &waiter);
        handle_progress_event(&event(json!({"percent": 50})), &executor, &waiter);

        assert!(executor.stopped.lock().unwrap().is_empty());
        assert!(waiter.resolved.lock().unwrap().is_empty());
    }

    #[test]
    fn binary_body_is_unpacked_before_resolving() {
        let executor = RecordingExecutor::default();
        let waiter = RecordingWaiter::default();

        let bytes = [0x00u8, 0xFF, 0x10];
        let payload = encode_progress(&JobProgress::Report(ProgressReport::WebhookResponse {
            execution_id: "E1".into(),
            response: json!({"status": 200, "body": crate::webhook::encode_body(&bytes)}),
        }));
        handle_progress_event(&event(payload), &executor, &waiter);

        let resolved = waiter.resolved.lock().unwrap();
        assert_eq!(
            resolved[0].1,
            WebhookResponse::Binary {
                response: json!({"status": 200}),
                body: bytes.to_vec(),
            }
        );
    }
}
