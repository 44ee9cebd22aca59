//! Drift agent - cloud waste detection and remediation service
//!
//! Serves the drift-tick trigger API with health and metrics endpoints and,
//! when an interval is configured, runs the tick on a heartbeat.

use anyhow::Result;
use drift_agent::{api, build_state, config::AgentConfig, heartbeat::Heartbeat};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting drift-agent");

    let config = AgentConfig::load()?;
    info!(
        instance = %config.instance_name,
        data_dir = %config.data_dir.display(),
        "Agent configured"
    );

    let state = build_state(&config).await?;
    state
        .logger
        .log_startup(AGENT_VERSION, state.tick.catalog().len());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat_handle = config.tick_interval().map(|interval| {
        tokio::spawn(Heartbeat::new(state.tick.clone(), interval).run(shutdown_rx))
    });

    let api_handle = tokio::spawn(api::serve(config.api_port, state.clone()));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            state.logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            state.logger.log_shutdown("API server exited");
            result??;
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(handle) = heartbeat_handle {
        let _ = handle.await;
    }
    info!("Shutting down");

    Ok(())
}
