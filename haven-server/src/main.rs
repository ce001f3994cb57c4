//! Haven Server - Main entry point.

use anyhow::Result;
use haven_common::config::Config;
use haven_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Haven Server v{}", env!("CARGO_PKG_VERSION"));

    // Start the server
    haven_server::start_server(&config).await
}
