use anyhow::Result;
use clap::Parser;
use confd::config::Config;
use confd::state::AppState;
use confd::supervisor;
use confd::telemetry::MetricsServer;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::parse();
    let metrics_listen = cfg.metrics_listen.clone();
    let state = AppState::new(cfg);

    let ms = MetricsServer::install(metrics_listen)?;
    tokio::spawn(async move {
        if let Err(e) = ms.serve().await {
            tracing::warn!("metrics server ended: {e:#}");
        }
    });

    tokio::select! {
        r = supervisor::run(state) => r?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    Ok(())
}
