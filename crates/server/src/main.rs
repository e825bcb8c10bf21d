//! Rollout Guard - guarded image and replica syncs for cluster deployments
//!
//! Serves the sync and batch API, streams progress events and keeps a
//! cluster reachability probe running.

use anyhow::{Context, Result};
use guard_lib::{
    cluster::ClusterClient,
    events::BroadcastSink,
    liveness::{components, LivenessRegistry},
    observability::StructuredLogger,
};
use rollout_guard::{api, config};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const GUARD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting rollout-guard");

    let config = config::GuardConfig::load()?;
    let cluster_config = config.cluster_config()?;
    let cluster = Arc::new(ClusterClient::new(&cluster_config).context("failed to create cluster client")?);
    info!(cluster_url = %config.cluster_url, "Guard configured");

    let logger = StructuredLogger::new("rollout-guard");
    logger.log_startup(GUARD_VERSION, &config.cluster_url);

    let liveness = LivenessRegistry::new();
    liveness.set_healthy(components::BATCH_CONTROLLER).await;
    let probe = liveness.spawn_cluster_probe(cluster.clone(), config.cluster_probe_interval());

    let app_state = Arc::new(api::AppState::new(
        cluster,
        cluster_config,
        BroadcastSink::default(),
        liveness.clone(),
        config.batch_options(),
        logger.clone(),
    ));

    liveness.set_started(true).await;

    api::serve(config.api_port, app_state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    probe.abort();
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    Ok(())
}
