//! Worker process: pulls jobs from the shared queue and executes them.
//!
//! Local mode wires the in-process queue; a broker-backed transport plugs in
//! through the same [`jobstream_queue::QueueConnector`] seam. The process
//! exits non-zero when the scaling service reports a fatal condition, so an
//! external supervisor can restart it.

mod executor;

use std::sync::Arc;

use jobstream_core::config::{Config, InstanceRole};
use jobstream_queue::memory::{MemoryConnector, MemoryQueue};
use jobstream_scaling::{InFlightResponses, ScalingService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::executor::LocalExecutor;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobstream_worker=debug,jobstream_scaling=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    if config.role != InstanceRole::Worker {
        tracing::error!(role = %config.role, "This binary requires INSTANCE_ROLE=worker");
        std::process::exit(1);
    }

    let queue = MemoryQueue::new(&config.queue_prefix);
    let concurrency = config.worker_concurrency;

    let service = ScalingService::new(
        config,
        Arc::new(MemoryConnector::new(queue)),
        Arc::new(LocalExecutor::new()),
        Arc::new(InFlightResponses::new()),
    );

    if let Err(e) = service.setup_queue().await {
        tracing::error!(error = %e, "Queue setup failed");
        std::process::exit(1);
    }
    if let Err(e) = service.setup_worker(concurrency).await {
        tracing::error!(error = %e, "Worker setup failed");
        std::process::exit(1);
    }

    tracing::info!(concurrency, "Worker ready");

    let mut fatal_rx = service.fatal_events();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            // Intake stops before anything else is torn down.
            service.shutdown().await;
        }
        changed = fatal_rx.wait_for(Option::is_some) => {
            if let Ok(fatal) = changed {
                if let Some(error) = fatal.as_ref() {
                    tracing::error!(error = %error, "Fatal queue condition");
                }
            }
            tracing::error!("Exiting process...");
            service.shutdown().await;
            std::process::exit(1);
        }
    }
}
