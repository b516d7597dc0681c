//! cryo checkpoint/restore operator.
//!
//! Watches Schedules, CheckpointRequests, Checkpoints, WorkloadInstances
//! and WorkloadGroups and converges each toward its desired state: cron
//! timers raise requests, requests capture checkpoints, checkpoints
//! become restorable images, and failed instances are pointed back at
//! their newest image.

use std::sync::Arc;

use anyhow::Result;
use cryo_operator::{
    capture::{CaptureService, MockCapture, NodeProxyCapture},
    config::Config,
    controllers::{
        CheckpointController, GroupController, RequestController, RestoreController,
        ScheduleController,
    },
    imagebuild::{BuildahBuilder, ImageBuilder, MockBuilder},
    runner::Controller,
};
use cryo_store::Cluster;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fall back to CRYO_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting cryo operator");
    info!(
        api_base_url = %config.api_base_url,
        checkpoints_dir = %config.checkpoints_dir.display(),
        image_registry = %config.image_registry,
        dev_mode = config.dev_mode,
        "Configuration loaded"
    );

    let cluster = Arc::new(Cluster::new());

    // Collaborators: mocks in dev mode, node-proxy capture and buildah
    // otherwise.
    let capture: Arc<dyn CaptureService> = if config.dev_mode {
        info!("Dev mode: using mock collaborators");
        Arc::new(MockCapture::new())
    } else {
        Arc::new(NodeProxyCapture::new(&config))
    };
    let builder: Arc<dyn ImageBuilder> = if config.dev_mode {
        Arc::new(MockBuilder::new())
    } else {
        Arc::new(BuildahBuilder::new(&config))
    };

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Schedule loop: cron timers raising checkpoint requests
    let schedules_handle = tokio::spawn({
        let cluster = cluster.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move {
            let controller = Controller::new("schedules", ScheduleController::new(cluster.clone()));
            controller.run(&cluster.schedules, shutdown_rx).await;
            controller.reconciler().timers().stop_all().await;
        }
    });

    // Request loop: captures checkpoints through the capture service
    let requests_handle = tokio::spawn({
        let cluster = cluster.clone();
        let shutdown_rx = shutdown_rx.clone();
        let reconciler =
            RequestController::new(cluster.clone(), capture, config.in_progress_requeue);
        async move {
            Controller::new("requests", reconciler)
                .run(&cluster.requests, shutdown_rx)
                .await;
        }
    });

    // Checkpoint loop: builds and pushes restorable images
    let checkpoints_handle = tokio::spawn({
        let cluster = cluster.clone();
        let shutdown_rx = shutdown_rx.clone();
        let reconciler = CheckpointController::new(
            cluster.clone(),
            builder,
            config.checkpoints_dir.clone(),
            config.image_registry.clone(),
        );
        async move {
            Controller::new("checkpoints", reconciler)
                .run(&cluster.checkpoints, shutdown_rx)
                .await;
        }
    });

    // Restore loop: rewrites failed instances to their newest image
    let restores_handle = tokio::spawn({
        let cluster = cluster.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move {
            Controller::new("restores", RestoreController::new(cluster.clone()))
                .run(&cluster.instances, shutdown_rx)
                .await;
        }
    });

    // Group loop: materializes schedules from group annotations
    let groups_handle = tokio::spawn({
        let cluster = cluster.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move {
            Controller::new("groups", GroupController::new(cluster.clone()))
                .run(&cluster.groups, shutdown_rx)
                .await;
        }
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    // Signal shutdown to all controllers
    let _ = shutdown_tx.send(true);

    info!("Waiting for controllers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);
    for (name, handle) in [
        ("schedules", schedules_handle),
        ("requests", requests_handle),
        ("checkpoints", checkpoints_handle),
        ("restores", restores_handle),
        ("groups", groups_handle),
    ] {
        if tokio::time::timeout(shutdown_timeout, handle).await.is_err() {
            warn!(controller = name, "Controller did not shut down in time");
        }
    }

    info!("Operator shutdown complete");
    Ok(())
}
