//! hl-scout entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Trader discovery and position tracking service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SCOUT_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before the first wss:// connect.
    scout_ws::init_crypto();

    let args = Args::parse();

    scout_telemetry::init_logging()?;

    info!("Starting hl-scout v{}", env!("CARGO_PKG_VERSION"));

    let config_path = scout_bot::AppConfig::resolve_path(args.config);
    info!(config_path = %config_path, "Loading configuration");

    let config = scout_bot::AppConfig::load(&config_path)?;
    info!(
        ws_url = %config.ws_url,
        info_url = %config.info_url,
        instruments = config.instruments.len(),
        "Configuration loaded"
    );

    let app = scout_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
