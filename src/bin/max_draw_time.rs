//! Prints the court's `maxDrawingTime` for the configured network.
//!
//! Usage:
//!   cargo run --bin max_draw_time
//!   cargo run --bin max_draw_time -- --config path/to/file.toml

use anyhow::Result;
use std::path::PathBuf;

use juror_notify::chain::RpcEventSource;
use juror_notify::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("juror-notify.toml"));

    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::from_env()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let network = config.network()?;
    let source = RpcEventSource::connect(&network).await?;

    match source.max_drawing_time().await {
        Ok(seconds) => {
            println!("maxTime: {seconds}");
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {e}");
            Err(e.into())
        }
    }
}
