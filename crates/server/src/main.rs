mod bootstrap;
mod health;
mod ingress;
mod publisher;

use anyhow::Result;
use hakatabot_core::config::{AppConfig, LoadOptions};
use tracing::{info, warn};

fn init_logging(config: &AppConfig) {
    use hakatabot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

async fn run() -> Result<()> {
    // Logging needs the loaded config, so bootstrap reuses it instead of loading again.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        detector_channel = app.config.detector.channel_id.as_deref().unwrap_or("-"),
        bus_enabled = app.config.bus.enabled,
        "hakatabot-server listening"
    );

    axum::serve(listener, app.router()).with_graceful_shutdown(wait_for_shutdown()).await?;

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "hakatabot-server stopping"
    );
    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for shutdown signal"
        );
    }
}
