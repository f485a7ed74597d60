//! juror-notify: watches the court contract and surfaces juror notifications.
//!
//! Usage:
//!   cargo run                                 # juror-notify.toml or env-only config
//!   cargo run -- --config path/to/file.toml
//!   cargo run -- --once                       # backfill, print, exit

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use juror_notify::chain::{EventSource, RpcEventSource};
use juror_notify::config::{Config, StoreBackend};
use juror_notify::notify::{
    AcknowledgmentStore, Acknowledger, Deriver, FileAckStore, MemoryAckStore, Notification,
    NotificationStream, StreamOptions, TokenSymbols,
};
use juror_notify::store::ValkeyAckStore;

const DEFAULT_CONFIG_PATH: &str = "juror-notify.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let once = args.iter().any(|a| a == "--once");
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::from_env()
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("juror-notify v{} starting", env!("CARGO_PKG_VERSION"));
    if !config_path.exists() {
        info!(path = %config_path.display(), "no config file found, using env-only config");
    }

    let network = config.network()?;
    let account = config.account()?;
    info!(
        chain_id = network.chain_id,
        contract = %network.contract_address,
        from_block = network.from_block,
        account = ?account,
        "network resolved"
    );

    let source: Arc<dyn EventSource> = Arc::new(
        RpcEventSource::connect(&network)
            .await
            .context("connecting to chain provider")?,
    );
    let store = open_store(&config).await?;

    let deriver = Deriver::new(
        TokenSymbols {
            native: network.native_token.clone(),
            stake: network.stake_token.clone(),
        },
        network.from_block,
    );

    let options = StreamOptions::default()
        .lookback_blocks(config.notifier.lookback_blocks)
        .live_from_block(config.live_from_block(&network))
        .on_new(Arc::new(move |batch: &[Notification], _ack: &Acknowledger| {
            for n in batch
                .iter()
                .filter(|n| account.map_or(true, |a| a == n.account))
            {
                info!(
                    key = %n.key,
                    category = ?n.category,
                    icon = n.category.icon(),
                    link = %n.link(),
                    at = %n.occurred_at,
                    "{}",
                    n.message
                );
            }
        }));

    let stream = NotificationStream::new(source, store, deriver, options);
    stream.start().await.context("starting notification stream")?;

    let view = stream.snapshot();
    let visible: Vec<&Notification> = match &account {
        Some(a) => view.notifications_for(a),
        None => view.notifications.iter().flatten().collect(),
    };
    println!("{}", serde_json::to_string_pretty(&visible)?);

    if once {
        stream.shutdown();
        return Ok(());
    }

    tokio::select! {
        result = stream.wait() => {
            if let Err(e) = result {
                error!(error = %e, "live mode ended");
                stream.shutdown();
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl-C, shutting down");
        }
    }

    stream.shutdown();
    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn AcknowledgmentStore>> {
    let store: Arc<dyn AcknowledgmentStore> = match config.store.backend {
        StoreBackend::Memory => {
            warn!("using in-memory acknowledgment store, acknowledgments will not persist");
            Arc::new(MemoryAckStore::new())
        }
        StoreBackend::File => Arc::new(FileAckStore::open(profile_path(config)).await?),
        StoreBackend::Valkey => {
            let store = ValkeyAckStore::connect(
                &config.store.valkey_url,
                &config.store.prefix,
                &config.store.profile,
            )
            .await?;
            store.ping().await?;
            info!(acknowledged = store.count().await?, "Valkey acknowledgment store ready");
            Arc::new(store)
        }
    };
    Ok(store)
}

/// `acknowledged.json` → `acknowledged.{profile}.json` for non-default profiles.
fn profile_path(config: &Config) -> PathBuf {
    let path = config.store.path.as_path();
    if config.store.profile == "default" {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("acknowledged");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    path.with_file_name(format!("{stem}.{}.{ext}", config.store.profile))
}
