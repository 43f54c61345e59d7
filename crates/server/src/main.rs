mod api;
mod audit_log;
mod bootstrap;
mod dispatcher;
mod employees;
mod health;
mod requests;
mod verification;
mod workflow;

use std::time::Duration;

use anyhow::Result;
use kahawa_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use kahawa_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = app.dispatcher.clone().spawn(
        Duration::from_secs(app.config.server.dispatch_interval_secs),
        app.workflow.subscribe(),
        shutdown_rx,
    );

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        sms_enabled = app.config.sms.enabled,
        "kahawa-server listening"
    );

    axum::serve(listener, app.router()).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "kahawa-server stopping"
    );
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(grace, dispatcher).await.is_err() {
        tracing::warn!(
            event_name = "system.shutdown.dispatcher_timeout",
            correlation_id = "shutdown",
            "notification dispatcher did not stop within the grace period"
        );
    }
    app.shutdown(grace).await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.shutdown.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for ctrl-c; shutting down"
        );
    }
}
