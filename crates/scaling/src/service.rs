//! The scaling service: queue lifecycle plus job lifecycle.
//!
//! Owns the process-wide queue connection. All other components reach jobs
//! through the operations here, never through a direct reference to the
//! connection. Fatal conditions are published on a watch channel for an
//! outer supervisor to act on; no business logic terminates the process
//! itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jobstream_core::config::{validate_prefix, Config, InstanceRole};
use jobstream_core::types::JobId;
use jobstream_queue::{
    JobData, JobOptions, JobProgress, JobRef, JobStatus, QueueClient, QueueConnector, QueueError,
};
use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::constants::{JOB_TYPE_NAME, QUEUE_NAME};
use crate::dispatcher::spawn_progress_dispatcher;
use crate::error::ScalingError;
use crate::executor::{ExecutorProcessor, JobExecutor, ResponseWaiter};
use crate::recovery::{ConnectionRecovery, RecoveryAction};

/// Coordinates job distribution between the dispatcher and worker roles.
pub struct ScalingService {
    role: InstanceRole,
    config: Config,
    connector: Arc<dyn QueueConnector>,
    executor: Arc<dyn JobExecutor>,
    waiter: Arc<dyn ResponseWaiter>,
    queue: RwLock<Option<Arc<dyn QueueClient>>>,
    /// First fatal condition observed; consumed by the supervisor.
    fatal_tx: watch::Sender<Option<ScalingError>>,
    /// Cancels the listener tasks on shutdown.
    cancel: CancellationToken,
}

impl ScalingService {
    pub fn new(
        config: Config,
        connector: Arc<dyn QueueConnector>,
        executor: Arc<dyn JobExecutor>,
        waiter: Arc<dyn ResponseWaiter>,
    ) -> Self {
        let (fatal_tx, _) = watch::channel(None);

        Self {
            role: config.role,
            config,
            connector,
            executor,
            waiter,
            queue: RwLock::new(None),
            fatal_tx,
            cancel: CancellationToken::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Establish the queue connection and install the progress and error
    /// listeners. Idempotent; must run before any other operation.
    ///
    /// A broker that is down does not fail this call — connection failures
    /// arrive asynchronously on the error stream and are handled by the
    /// recovery state machine.
    pub async fn setup_queue(&self) -> Result<(), ScalingError> {
        let mut slot = self.queue.write().await;
        if slot.is_some() {
            tracing::debug!("Queue already set up");
            return Ok(());
        }

        let prefix = validate_prefix(&self.config.queue_prefix)?;
        let queue = self.connector.connect(QUEUE_NAME, &prefix).await?;

        self.register_listeners(queue.as_ref());
        *slot = Some(queue);

        tracing::debug!(prefix = %prefix, "Queue setup completed");
        Ok(())
    }

    /// Register the job executor as this worker's handler.
    ///
    /// Valid only under the worker role; dispatchers get a
    /// [`ScalingError::RoleViolation`] and no side effects.
    pub async fn setup_worker(&self, concurrency: usize) -> Result<(), ScalingError> {
        self.assert_worker()?;

        let queue = self.queue().await?;
        let processor = Arc::new(ExecutorProcessor(Arc::clone(&self.executor)));
        queue.process(JOB_TYPE_NAME, concurrency, processor).await?;

        tracing::debug!(concurrency, "Worker setup completed");
        Ok(())
    }

    /// Stop job intake, locally and globally, without aborting jobs already
    /// in flight.
    ///
    /// Must run before any teardown that closes the underlying connection;
    /// [`shutdown`](Self::shutdown) enforces that ordering.
    pub async fn pause_queue(&self) -> Result<(), ScalingError> {
        self.queue().await?.pause(true, true).await?;
        tracing::debug!("Queue paused");
        Ok(())
    }

    /// Liveness probe: round-trip to the broker.
    pub async fn ping_queue(&self) -> Result<(), ScalingError> {
        self.queue().await?.ping().await?;
        Ok(())
    }

    /// Pause intake first, then cancel the listener tasks.
    pub async fn shutdown(&self) {
        // Pausing requires a live connection, so it runs at the highest
        // shutdown tier, before anything is torn down.
        if let Err(e) = self.pause_queue().await {
            tracing::warn!(error = %e, "Failed to pause queue during shutdown");
        }
        self.cancel.cancel();
    }

    /// Observe the first fatal condition (escalated outage, broker init
    /// failure, stalled-job budget, or an unclassified error).
    ///
    /// The supervisor watching this decides whether to exit; by the time a
    /// value appears here the service has already stopped being useful.
    pub fn fatal_events(&self) -> watch::Receiver<Option<ScalingError>> {
        self.fatal_tx.subscribe()
    }

    // ---------------------------------------------------------------------
    // Jobs
    // ---------------------------------------------------------------------

    /// Enqueue a job. The data must carry a non-empty execution identifier.
    pub async fn add_job(
        &self,
        data: JobData,
        options: JobOptions,
    ) -> Result<JobRef, ScalingError> {
        if data.execution_id.trim().is_empty() {
            return Err(ScalingError::MissingExecutionId);
        }
        let execution_id = data.execution_id.clone();

        let job = self.queue().await?.add(JOB_TYPE_NAME, data, options).await?;

        tracing::info!(
            job_id = %job.id(),
            execution_id = %execution_id,
            "Added job",
        );
        Ok(job)
    }

    /// Look up a job by identifier.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<JobRef>, ScalingError> {
        Ok(self.queue().await?.get_job(id).await?)
    }

    /// List jobs currently in any of the given states.
    pub async fn find_jobs_by_state(
        &self,
        statuses: &[JobStatus],
    ) -> Result<Vec<JobRef>, ScalingError> {
        Ok(self.queue().await?.get_jobs(statuses).await?)
    }

    /// Race-safe job stop. Never returns an error.
    ///
    /// Active jobs get the advisory abort signal on their progress channel;
    /// inactive jobs are removed outright. If either step fails — typically
    /// because the job's state changed between the check and the action —
    /// the abort signal is sent anyway (covering the case where the job
    /// became active after the check) and `false` is returned. Callers
    /// seeing `false` must re-query the job's status rather than assume it
    /// stopped.
    pub async fn stop_job(&self, job: &JobRef) -> bool {
        let job_id = job.id().clone();
        let execution_id = job.data().execution_id.clone();

        match self.try_stop(job).await {
            Ok(()) => true,
            Err(error) => {
                if let Err(e) = job.report_progress(&JobProgress::Abort).await {
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        "Failed to send abort signal on fallback path",
                    );
                }

                // Often a benign race (the job finished between the check
                // and the removal), hence warn rather than error.
                tracing::warn!(
                    job_id = %job_id,
                    execution_id = %execution_id,
                    error = %error,
                    "Failed to stop job; its state may have changed concurrently",
                );
                false
            }
        }
    }

    async fn try_stop(&self, job: &JobRef) -> Result<(), QueueError> {
        let job_id = job.id();
        let execution_id = &job.data().execution_id;

        if job.is_active().await? {
            // Advisory only: the signal is delivered, the executor reacts.
            job.report_progress(&JobProgress::Abort).await?;
            tracing::debug!(job_id = %job_id, execution_id = %execution_id, "Stopped active job");
            return Ok(());
        }

        job.remove().await?;
        tracing::debug!(job_id = %job_id, execution_id = %execution_id, "Stopped inactive job");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Listeners
    // ---------------------------------------------------------------------

    fn register_listeners(&self, queue: &dyn QueueClient) {
        spawn_progress_dispatcher(
            queue.progress_events(),
            Arc::clone(&self.executor),
            Arc::clone(&self.waiter),
            self.cancel.child_token(),
        );
        self.spawn_error_listener(queue.error_events());
    }

    fn spawn_error_listener(&self, mut error_rx: broadcast::Receiver<QueueError>) {
        let mut recovery = ConnectionRecovery::new(
            self.role,
            Duration::from_millis(self.config.outage_budget_ms),
        );
        let fatal_tx = self.fatal_tx.clone();
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = error_rx.recv() => match event {
                        Ok(error) => {
                            tracing::error!(error = %error, "Queue errored");
                            let message = error.to_string();

                            match recovery.observe(&message, Instant::now()) {
                                RecoveryAction::Retry { cumulative_outage } => {
                                    tracing::warn!(
                                        outage_ms = cumulative_outage.as_millis() as u64,
                                        "Broker unavailable, waiting for the client to reconnect",
                                    );
                                }
                                RecoveryAction::Escalate { cumulative_outage } => {
                                    let outage_ms = cumulative_outage.as_millis() as u64;
                                    tracing::error!(
                                        outage_ms,
                                        "Broker unavailable past the outage budget",
                                    );
                                    publish_fatal(
                                        &fatal_tx,
                                        ScalingError::EscalatedConnectionFailure { outage_ms },
                                    );
                                }
                                RecoveryAction::StalledJobBudget => {
                                    publish_fatal(
                                        &fatal_tx,
                                        ScalingError::StalledJobBudgetExceeded(message),
                                    );
                                }
                                RecoveryAction::FatalInit => {
                                    tracing::error!(error = %message, "Fatal error initializing worker");
                                    publish_fatal(&fatal_tx, ScalingError::FatalInitFailure(message));
                                }
                                RecoveryAction::Raise => {
                                    // Never swallowed: the supervisor decides
                                    // whether this is fatal.
                                    publish_fatal(
                                        &fatal_tx,
                                        ScalingError::UnclassifiedQueueError(message),
                                    );
                                }
                                RecoveryAction::Ignore => {}
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Error stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            tracing::debug!("Error listener exited");
        });
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    async fn queue(&self) -> Result<Arc<dyn QueueClient>, ScalingError> {
        self.queue
            .read()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(ScalingError::QueueNotReady)
    }

    fn assert_worker(&self) -> Result<(), ScalingError> {
        if self.role == InstanceRole::Worker {
            Ok(())
        } else {
            Err(ScalingError::RoleViolation)
        }
    }
}

/// Record the first fatal condition; later ones only get logged.
fn publish_fatal(fatal_tx: &watch::Sender<Option<ScalingError>>, error: ScalingError) {
    let published = fatal_tx.send_if_modified(|slot| {
        if slot.is_none() {
            *slot = Some(error.clone());
            true
        } else {
            false
        }
    });

    if !published {
        tracing::debug!(error = %error, "Fatal condition already pending, dropping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use jobstream_queue::memory::{MemoryConnector, MemoryQueue};
    use jobstream_queue::{Job, JobOutcome};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use crate::webhook::WebhookResponse;

    struct NoopExecutor;

    #[async_trait]
    impl JobExecutor for NoopExecutor {
        async fn process_job(&self, _job: JobRef) -> Result<JobOutcome, QueueError> {
            Ok(JobOutcome { success: true })
        }

        fn stop_job(&self, _job_id: &JobId) {}
    }

    struct NoopWaiter;

    impl ResponseWaiter for NoopWaiter {
        fn resolve(&self, _execution_id: &str, _response: WebhookResponse) {}
    }

    /// Job double whose state transitions are scripted by the test.
    struct ScriptedJob {
        id: JobId,
        data: JobData,
        active: bool,
        remove_fails: bool,
        removed: AtomicBool,
        progress: Mutex<Vec<JobProgress>>,
    }

    impl ScriptedJob {
        fn new(active: bool, remove_fails: bool) -> Arc<Self> {
            Arc::new(Self {
                id: "42".to_string(),
                data: JobData {
                    execution_id: "E1".to_string(),
                    payload: json!({}),
                },
                active,
                remove_fails,
                removed: AtomicBool::new(false),
                progress: Mutex::new(Vec::new()),
            })
        }

        fn abort_signals(&self) -> usize {
            self.progress
                .lock()
                .unwrap()
                .iter()
                .filter(|p| **p == JobProgress::Abort)
                .count()
        }
    }

    #[async_trait]
    impl Job for ScriptedJob {
        fn id(&self) -> &JobId {
            &self.id
        }

        fn data(&self) -> &JobData {
            &self.data
        }

        async fn is_active(&self) -> Result<bool, QueueError> {
            Ok(self.active)
        }

        async fn remove(&self) -> Result<(), QueueError> {
            if self.remove_fails {
                // The worker picked the job up between check and removal.
                return Err(QueueError::JobActive(self.id.clone()));
            }
            self.removed.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn report_progress(&self, progress: &JobProgress) -> Result<(), QueueError> {
            self.progress.lock().unwrap().push(progress.clone());
            Ok(())
        }
    }

    fn config(role: InstanceRole) -> Config {
        Config {
            role,
            queue_prefix: "jobs".to_string(),
            broker_url: "memory://".to_string(),
            outage_budget_ms: 10_000,
            worker_concurrency: 2,
        }
    }

    fn service(role: InstanceRole, queue: Arc<MemoryQueue>) -> ScalingService {
        service_with_config(config(role), queue)
    }

    fn service_with_config(config: Config, queue: Arc<MemoryQueue>) -> ScalingService {
        ScalingService::new(
            config,
            Arc::new(MemoryConnector::new(queue)),
            Arc::new(NoopExecutor),
            Arc::new(NoopWaiter),
        )
    }

    #[tokio::test]
    async fn operations_fail_before_setup() {
        let service = service(InstanceRole::Dispatcher, MemoryQueue::new("jobs"));
        assert_matches!(
            service.ping_queue().await,
            Err(ScalingError::QueueNotReady)
        );
    }

    #[tokio::test]
    async fn setup_queue_is_idempotent() {
        let service = service(InstanceRole::Dispatcher, MemoryQueue::new("jobs"));
        service.setup_queue().await.unwrap();
        service.setup_queue().await.unwrap();
        service.ping_queue().await.unwrap();
    }

    #[tokio::test]
    async fn setup_worker_rejects_dispatcher_role_without_side_effects() {
        let queue = MemoryQueue::new("jobs");
        let dispatcher = service(InstanceRole::Dispatcher, Arc::clone(&queue));
        dispatcher.setup_queue().await.unwrap();

        assert_matches!(
            dispatcher.setup_worker(4).await,
            Err(ScalingError::RoleViolation)
        );

        // No handler was registered: the dispatch receiver is still there.
        let worker = service(InstanceRole::Worker, queue);
        worker.setup_queue().await.unwrap();
        worker.setup_worker(4).await.unwrap();
    }

    #[tokio::test]
    async fn add_job_requires_an_execution_id() {
        let service = service(InstanceRole::Dispatcher, MemoryQueue::new("jobs"));
        service.setup_queue().await.unwrap();

        let data = JobData {
            execution_id: "  ".to_string(),
            payload: json!({}),
        };
        assert_matches!(
            service.add_job(data, JobOptions::default()).await,
            Err(ScalingError::MissingExecutionId)
        );
    }

    #[tokio::test]
    async fn add_and_find_jobs() {
        let service = service(InstanceRole::Dispatcher, MemoryQueue::new("jobs"));
        service.setup_queue().await.unwrap();

        let data = JobData {
            execution_id: "E1".to_string(),
            payload: json!({"kind": "demo"}),
        };
        let job = service.add_job(data, JobOptions::default()).await.unwrap();

        let found = service.get_job(job.id()).await.unwrap();
        assert!(found.is_some());

        let waiting = service
            .find_jobs_by_state(&[JobStatus::Waiting])
            .await
            .unwrap();
        assert_eq!(waiting.len(), 1);
    }

    #[tokio::test]
    async fn stop_active_job_sends_exactly_one_abort() {
        let service = service(InstanceRole::Dispatcher, MemoryQueue::new("jobs"));
        let job = ScriptedJob::new(true, false);

        let job_ref: JobRef = Arc::clone(&job) as JobRef;
        assert!(service.stop_job(&job_ref).await);

        assert_eq!(job.abort_signals(), 1);
        assert!(!job.removed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_inactive_job_removes_it() {
        let service = service(InstanceRole::Dispatcher, MemoryQueue::new("jobs"));
        let job = ScriptedJob::new(false, false);

        let job_ref: JobRef = Arc::clone(&job) as JobRef;
        assert!(service.stop_job(&job_ref).await);

        assert!(job.removed.load(Ordering::SeqCst));
        assert_eq!(job.abort_signals(), 0);
    }

    #[tokio::test]
    async fn stop_falls_back_to_abort_when_removal_races() {
        let service = service(InstanceRole::Dispatcher, MemoryQueue::new("jobs"));
        let job = ScriptedJob::new(false, true);

        // Never raises; resolves to false with the abort sent anyway.
        let job_ref: JobRef = Arc::clone(&job) as JobRef;
        assert!(!service.stop_job(&job_ref).await);
        assert_eq!(job.abort_signals(), 1);
    }

    #[tokio::test]
    async fn persistent_connection_failures_escalate() {
        let queue = MemoryQueue::new("jobs");
        let mut config = config(InstanceRole::Dispatcher);
        config.outage_budget_ms = 1;
        let service = service_with_config(config, Arc::clone(&queue));
        service.setup_queue().await.unwrap();
        let mut fatal_rx = service.fatal_events();

        queue.inject_error(QueueError::Connection("connect ECONNREFUSED".into()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.inject_error(QueueError::Connection("connect ECONNREFUSED".into()));

        tokio::time::timeout(Duration::from_secs(1), fatal_rx.wait_for(Option::is_some))
            .await
            .expect("escalation must be published")
            .unwrap();

        assert_matches!(
            fatal_rx.borrow().as_ref(),
            Some(ScalingError::EscalatedConnectionFailure { .. })
        );
    }

    #[tokio::test]
    async fn stalled_job_budget_is_fatal_on_workers() {
        let queue = MemoryQueue::new("jobs");
        let service = service(InstanceRole::Worker, Arc::clone(&queue));
        service.setup_queue().await.unwrap();
        let mut fatal_rx = service.fatal_events();

        queue.inject_error(QueueError::Broker(
            "job stalled more than maxStalledCount".into(),
        ));

        tokio::time::timeout(Duration::from_secs(1), fatal_rx.wait_for(Option::is_some))
            .await
            .expect("fatal condition must be published")
            .unwrap();

        assert_matches!(
            fatal_rx.borrow().as_ref(),
            Some(ScalingError::StalledJobBudgetExceeded(_))
        );
    }
}
