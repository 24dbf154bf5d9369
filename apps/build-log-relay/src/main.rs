use anyhow::{Context, Result};
use build_log_relay::{
    config::Cli,
    routes::{build_router, cors_layer, AppState},
    telemetry::Telemetry,
    RelayConfig, UpstreamHandle,
};
use clap::Parser;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = RelayConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        jenkins_url = %config.jenkins_url,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "starting build-log-relay"
    );

    let upstream = UpstreamHandle::connect(&config).await;
    if !upstream.is_available() {
        warn!("jenkins connection failed; job and log endpoints will report errors");
    }

    let state =
        AppState::new(upstream, config.stream_settings()).with_metrics(telemetry.metrics_handle());
    let router = build_router(state)
        .layer(cors_layer(config.allowed_origins.clone()))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("build-log-relay listening on {}", config.listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    if !config.shutdown_grace.is_zero() {
        info!(
            grace_seconds = config.shutdown_grace.as_secs(),
            "shutdown signal received; sleeping for graceful period"
        );
        tokio::time::sleep(config.shutdown_grace).await;
    }
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
