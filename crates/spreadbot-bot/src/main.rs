//! spreadbot - Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// MEXC futures spread-arbitrage engine
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SPREADBOT_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    spreadbot_telemetry::init_logging()?;

    info!("Starting spreadbot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > SPREADBOT_CONFIG > default
    let config_path = args
        .config
        .or_else(|| std::env::var("SPREADBOT_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = spreadbot_bot::AppConfig::from_file(&config_path)?;
    info!(
        mode = ?config.feed.mode,
        feed_url = %config.feed.url,
        redis = config.redis_url.is_some(),
        "Configuration loaded"
    );

    spreadbot_bot::Application::new(config).run().await?;

    Ok(())
}
