use std::sync::Arc;

use anyhow::Context;
use gatekeeper_oracle::{AnomalyOracle, HttpOracle};
use gatekeeper_server::{
    run_server, DirectoryStore, Gatekeeper, Limits, ServerConfig, Sinks, TracingSink,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env().context("reading configuration")?;
    let oracle = HttpOracle::new(config.oracle.clone()).context("building oracle client")?;
    match oracle.health().await {
        Ok(health) if health.is_healthy() => {
            info!(url = %config.oracle.base_url, "oracle healthy")
        }
        Ok(health) => warn!(
            url = %config.oracle.base_url,
            status = %health.status,
            models_loaded = health.models_loaded,
            "oracle degraded; decisions will use the conservative floor"
        ),
        Err(e) => warn!(
            url = %config.oracle.base_url,
            error = %e,
            "oracle unreachable; decisions will use the conservative floor"
        ),
    }

    let tracing_sink = Arc::new(TracingSink::new());
    let sinks = Sinks {
        audit: tracing_sink.clone(),
        alerts: tracing_sink,
        artifacts: Arc::new(DirectoryStore::new(config.artifact_dir.clone())),
    };
    let gate = Arc::new(Gatekeeper::new(&config, Arc::new(oracle), sinks));
    let sweeper = gate.store().spawn_sweeper(config.sweep_interval);

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(
        bind = %config.bind,
        threshold = config.policy.acceptance_threshold,
        floor = config.policy.conservative_floor,
        "gatekeeper listening"
    );

    tokio::select! {
        _ = run_server(listener, gate, Limits::from(&config)) => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    sweeper.abort();
    Ok(())
}
