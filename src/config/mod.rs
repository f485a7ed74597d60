use alloy::primitives::Address;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
    #[error("invalid contract address {0:?}")]
    InvalidAddress(String),
    #[error("unsupported network {0}: set network.provider_url and network.contract_address")]
    UnsupportedNetwork(u64),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Selects one of the built-in network presets.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default)]
    pub network: NetworkOverrides,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-network values that replace the preset when set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkOverrides {
    pub provider_url: Option<String>,
    pub contract_address: Option<String>,
    pub from_block: Option<u64>,
    pub native_token: Option<String>,
    pub stake_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// How many recent blocks the startup backfill covers.
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,
    /// First block of the live subscription; defaults to the network's from_block.
    #[serde(default)]
    pub live_from_block: Option<u64>,
    /// Only surface notifications addressed to this juror.
    #[serde(default)]
    pub account: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    File,
    Valkey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    /// Acknowledgment file for the `file` backend.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_valkey_url")]
    pub valkey_url: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Acknowledgments are scoped per profile.
    #[serde(default = "default_profile")]
    pub profile: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// Fully resolved settings for one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub provider_url: String,
    pub contract_address: Address,
    /// Earliest block worth querying (the court deployment block).
    pub from_block: u64,
    pub native_token: String,
    pub stake_token: String,
}

/// Built-in network table.
struct NetworkPreset {
    chain_id: u64,
    /// Suffix of the `KLEROS_LIQUID{suffix}_*` environment variables.
    env_suffix: &'static str,
    provider_url: Option<&'static str>,
    native_token: &'static str,
    stake_token: &'static str,
}

const PRESETS: &[NetworkPreset] = &[
    NetworkPreset {
        chain_id: 1,
        env_suffix: "",
        provider_url: None,
        native_token: "ETH",
        stake_token: "PNK",
    },
    NetworkPreset {
        chain_id: 100,
        env_suffix: "_XDAI",
        provider_url: Some("https://rpc.gnosischain.com"),
        native_token: "xDAI",
        stake_token: "stPNK",
    },
    NetworkPreset {
        chain_id: 10200,
        env_suffix: "_CHIADO",
        provider_url: Some("https://rpc.chiadochain.net"),
        native_token: "xDAI",
        stake_token: "PNK",
    },
    NetworkPreset {
        chain_id: 11155111,
        env_suffix: "_SEPOLIA",
        provider_url: Some("https://ethereum-sepolia-rpc.publicnode.com"),
        native_token: "ETH",
        stake_token: "PNK",
    },
];

pub const DEFAULT_NATIVE_TOKEN: &str = "ETH";
pub const DEFAULT_STAKE_TOKEN: &str = "PNK";

fn default_chain_id() -> u64 {
    1
}
fn default_lookback_blocks() -> u64 {
    256
}
fn default_store_backend() -> StoreBackend {
    StoreBackend::File
}
fn default_store_path() -> PathBuf {
    PathBuf::from("acknowledged.json")
}
fn default_valkey_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_prefix() -> String {
    "juror-notify".to_string()
}
fn default_profile() -> String {
    "default".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            lookback_blocks: default_lookback_blocks(),
            live_from_block: None,
            account: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
            valkey_url: default_valkey_url(),
            prefix: default_prefix(),
            profile: default_profile(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Default config driven by environment variables only.
    pub fn from_env() -> Self {
        let mut config = Config {
            chain_id: std::env::var("CHAIN_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_chain_id),
            network: NetworkOverrides::default(),
            notifier: NotifierConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("WEB3_PROVIDER_URL") {
            self.network.provider_url = Some(url);
        }
        if let Ok(account) = std::env::var("JUROR_ACCOUNT") {
            self.notifier.account = Some(account);
        }
    }

    /// Resolve the selected network from presets, env vars and overrides.
    pub fn network(&self) -> Result<NetworkConfig, ConfigError> {
        let preset = PRESETS.iter().find(|p| p.chain_id == self.chain_id);
        let env = |name: &str| -> Option<String> {
            let suffix = preset.map(|p| p.env_suffix)?;
            std::env::var(format!("KLEROS_LIQUID{suffix}_{name}")).ok()
        };

        let provider_url = self
            .network
            .provider_url
            .clone()
            .or_else(|| preset.and_then(|p| p.provider_url).map(str::to_string))
            .ok_or_else(|| match preset {
                Some(_) => ConfigError::MissingEnv("WEB3_PROVIDER_URL".to_string()),
                None => ConfigError::UnsupportedNetwork(self.chain_id),
            })?;

        let raw_address = self
            .network
            .contract_address
            .clone()
            .or_else(|| env("ADDRESS"))
            .ok_or_else(|| match preset {
                Some(p) => ConfigError::MissingEnv(format!("KLEROS_LIQUID{}_ADDRESS", p.env_suffix)),
                None => ConfigError::UnsupportedNetwork(self.chain_id),
            })?;
        let contract_address = Address::from_str(raw_address.trim())
            .map_err(|_| ConfigError::InvalidAddress(raw_address.clone()))?;

        let from_block = self
            .network
            .from_block
            .or_else(|| env("BLOCK_NUMBER").and_then(|v| v.trim().parse().ok()))
            .unwrap_or(0);

        Ok(NetworkConfig {
            chain_id: self.chain_id,
            provider_url,
            contract_address,
            from_block,
            native_token: self
                .network
                .native_token
                .clone()
                .unwrap_or_else(|| preset.map_or(DEFAULT_NATIVE_TOKEN, |p| p.native_token).to_string()),
            stake_token: self
                .network
                .stake_token
                .clone()
                .unwrap_or_else(|| preset.map_or(DEFAULT_STAKE_TOKEN, |p| p.stake_token).to_string()),
        })
    }

    /// Juror filter, if configured.
    pub fn account(&self) -> Result<Option<Address>, ConfigError> {
        self.notifier
            .account
            .as_deref()
            .map(|raw| Address::from_str(raw.trim()).map_err(|_| ConfigError::InvalidAddress(raw.to_string())))
            .transpose()
    }

    pub fn live_from_block(&self, network: &NetworkConfig) -> u64 {
        self.notifier.live_from_block.unwrap_or(network.from_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COURT: &str = "0x988b3a538b618c7a603e1c11ab82cd16dbe28069";

    fn parse(toml_src: &str) -> Config {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn defaults_apply_to_empty_file() {
        let config = parse("");
        assert_eq!(config.chain_id, 1);
        assert_eq!(config.notifier.lookback_blocks, 256);
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn gnosis_preset_symbols_and_overrides() {
        let config = parse(&format!(
            r#"
            chain_id = 100
            [network]
            contract_address = "{COURT}"
            from_block = 16895601
            "#
        ));
        let network = config.network().unwrap();
        assert_eq!(network.native_token, "xDAI");
        assert_eq!(network.stake_token, "stPNK");
        assert_eq!(network.provider_url, "https://rpc.gnosischain.com");
        assert_eq!(network.from_block, 16895601);
        assert_eq!(config.live_from_block(&network), 16895601);
    }

    #[test]
    fn unknown_network_needs_explicit_endpoint() {
        let config = parse("chain_id = 424242");
        assert!(matches!(
            config.network(),
            Err(ConfigError::UnsupportedNetwork(424242))
        ));

        let config = parse(&format!(
            r#"
            chain_id = 424242
            [network]
            provider_url = "ws://localhost:8546"
            contract_address = "{COURT}"
            "#
        ));
        let network = config.network().unwrap();
        assert_eq!(network.native_token, DEFAULT_NATIVE_TOKEN);
        assert_eq!(network.stake_token, DEFAULT_STAKE_TOKEN);
        assert_eq!(network.from_block, 0);
    }

    #[test]
    fn bad_address_is_rejected() {
        let config = parse(
            r#"
            chain_id = 100
            [network]
            contract_address = "not-an-address"
            "#,
        );
        assert!(matches!(config.network(), Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn store_backend_parses() {
        let config = parse(
            r#"
            [store]
            backend = "valkey"
            profile = "alice"
            "#,
        );
        assert_eq!(config.store.backend, StoreBackend::Valkey);
        assert_eq!(config.store.profile, "alice");
        assert_eq!(config.store.prefix, "juror-notify");
    }
}
