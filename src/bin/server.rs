//! Screener server - headless streaming pipeline.
//!
//! Ingests 1-minute perpetual-futures candles, derives multi-timeframe
//! metrics and indicators, evaluates the alert rule catalogue and fans
//! matches out to the bus, the history store and webhook sinks. Metrics are
//! pushed via structured JSON logs to stdout - no HTTP server, no incoming
//! connections.
//!
//! # Usage
//! ```sh
//! TIMESERIES_DB_URL=postgres://... METADATA_DB_URL=postgres://... cargo run --bin server
//! ```

use anyhow::Result;
use screener::application::system::Application;
use screener::config::Config;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Screener {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: {} shards, {} static webhook sinks, observability={}",
        config.engine.shards,
        config.alerts.webhook_urls.len(),
        config.observability.enabled
    );

    let app = Application::build(config).await?;
    let handle = app.start().await?;

    info!("Server running. Press Ctrl+C to shutdown.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    handle.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}
