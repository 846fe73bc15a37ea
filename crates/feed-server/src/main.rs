//! # Feed Server
//!
//! Home-timeline fan-out and pagination service.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! feedd
//!
//! # Run with a config file
//! FEED_CONFIG=/path/to/feed.toml feedd
//!
//! # Run with environment variables
//! FEED_PORT=8080 FEED_HOST=0.0.0.0 FEED__CONSUMER__ENABLED=true feedd
//! ```

mod config;
mod error;
mod handlers;
mod metrics;

use anyhow::Result;
use config::LogFormat;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration comes first so the log section can shape the subscriber
    let config = config::Config::load()?;

    let level = &config.log.level;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("feedd={level},feed_core={level},feed_consumer={level}").into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match config.log.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!("Starting feed server on {}:{}", config.host, config.port);

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
