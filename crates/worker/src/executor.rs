//! Local job executor for the worker binary.
//!
//! Interprets a small payload vocabulary (`delayMs`, `respond`, `fail`) and
//! honours cooperative cancellation: `stop_job` cancels the per-job token
//! and the in-flight `process_job` winds down at its next await point.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use jobstream_core::types::JobId;
use jobstream_queue::{JobOutcome, JobProgress, JobRef, ProgressReport, QueueError};
use jobstream_scaling::JobExecutor;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct LocalExecutor {
    running: Mutex<HashMap<JobId, CancellationToken>>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl JobExecutor for LocalExecutor {
    async fn process_job(&self, job: JobRef) -> Result<JobOutcome, QueueError> {
        let token = CancellationToken::new();
        self.lock_running().insert(job.id().clone(), token.clone());

        let payload = &job.data().payload;
        let delay_ms = payload.get("delayMs").and_then(|v| v.as_u64()).unwrap_or(0);
        let fail = payload
            .get("fail")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let cancelled = tokio::select! {
            _ = token.cancelled() => true,
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => false,
        };

        self.lock_running().remove(job.id());

        if cancelled {
            tracing::info!(
                job_id = %job.id(),
                execution_id = %job.data().execution_id,
                "Job cancelled cooperatively",
            );
            return Ok(JobOutcome { success: true });
        }

        if let Some(response) = payload.get("respond") {
            job.report_progress(&JobProgress::Report(ProgressReport::WebhookResponse {
                execution_id: job.data().execution_id.clone(),
                response: response.clone(),
            }))
            .await?;
        }

        Ok(JobOutcome { success: !fail })
    }

    fn stop_job(&self, job_id: &JobId) {
        if let Some(token) = self.lock_running().get(job_id) {
            tracing::debug!(job_id = %job_id, "Abort requested");
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstream_queue::memory::MemoryQueue;
    use jobstream_queue::{JobData, JobOptions, QueueClient};
    use serde_json::json;
    use std::sync::Arc;

    async fn make_job(payload: serde_json::Value) -> JobRef {
        let queue = MemoryQueue::new("jobs");
        queue
            .add(
                "job",
                JobData {
                    execution_id: "E1".to_string(),
                    payload,
                },
                JobOptions::default(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn completes_and_reports_the_requested_response() {
        let executor = LocalExecutor::new();
        let job = make_job(json!({"respond": {"status": 200}})).await;

        let outcome = executor.process_job(Arc::clone(&job)).await.unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn fail_flag_reports_failure() {
        let executor = LocalExecutor::new();
        let job = make_job(json!({"fail": true})).await;

        let outcome = executor.process_job(job).await.unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn stop_job_cancels_a_running_job() {
        let executor = Arc::new(LocalExecutor::new());
        let job = make_job(json!({"delayMs": 30_000})).await;
        let job_id = job.id().clone();

        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.process_job(job).await })
        };

        // Wait until the job registers, then ask it to stop.
        for _ in 0..100 {
            if !executor.lock_running().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        executor.stop_job(&job_id);

        let outcome = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("job must wind down after the abort")
            .unwrap()
            .unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn stopping_an_unknown_job_is_a_no_op() {
        let executor = LocalExecutor::new();
        executor.stop_job(&"unknown".to_string());
    }
}
