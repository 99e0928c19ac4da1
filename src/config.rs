//! Configuration management for the swap bridge relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub signer: SignerConfig,
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub swap_pair: SwapPairConfig,
    pub chains: ChainsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub send_tx_delay_ms: u64,
    pub max_track_retry: u32,
    pub hmac_key: String,
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
    #[serde(default = "default_liveness_interval")]
    pub liveness_check_interval_secs: u64,
}

fn default_prune_interval() -> u64 {
    600
}

fn default_liveness_interval() -> u64 {
    60
}

impl RelayerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn send_tx_delay(&self) -> Duration {
        Duration::from_millis(self.send_tx_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    pub url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_signer_timeout")]
    pub timeout_secs: u64,
}

fn default_signer_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    pub webhook_url: Option<String>,
    pub liveness_threshold_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapPairConfig {
    #[serde(default = "default_lower_bound")]
    pub default_lower_bound: String,
    #[serde(default = "default_upper_bound")]
    pub default_upper_bound: String,
}

fn default_lower_bound() -> String {
    "0".to_string()
}

fn default_upper_bound() -> String {
    "100000000000000000000000000000000".to_string()
}

impl Default for SwapPairConfig {
    fn default() -> Self {
        Self {
            default_lower_bound: default_lower_bound(),
            default_upper_bound: default_upper_bound(),
        }
    }
}

/// The two chains the bridge spans
#[derive(Debug, Clone, Deserialize)]
pub struct ChainsConfig {
    pub eth: ChainConfig,
    pub bsc: ChainConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub swap_agent_address: String,
    pub sender_address: String,
    pub start_height: u64,
    pub confirmation_blocks: u64,
    pub fetch_interval_ms: u64,
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_prune_window")]
    pub prune_window: u64,
}

fn default_rpc_timeout() -> u64 {
    5
}

fn default_prune_window() -> u64 {
    1000
}

impl ChainConfig {
    pub fn swap_agent(&self) -> Result<Address> {
        self.swap_agent_address
            .parse()
            .with_context(|| format!("Invalid swap agent address for {}", self.name))
    }

    pub fn sender(&self) -> Result<Address> {
        self.sender_address
            .parse()
            .with_context(|| format!("Invalid sender address for {}", self.name))
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

impl Settings {
    /// Load settings from the file named by `BRIDGE_RELAYER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("BRIDGE_RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.relayer.hmac_key.trim().is_empty() {
            anyhow::bail!("relayer.hmac_key must be set");
        }
        if self.relayer.batch_size == 0 {
            anyhow::bail!("relayer.batch_size must be positive");
        }

        for chain in [&self.chains.eth, &self.chains.bsc] {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", chain.name);
            }
            if chain.confirmation_blocks == 0 {
                anyhow::bail!("Chain {} needs at least one confirmation block", chain.name);
            }
            chain.swap_agent()?;
            chain.sender()?;
        }

        let lower = U256::from_dec_str(&self.swap_pair.default_lower_bound)
            .with_context(|| "swap_pair.default_lower_bound is not a decimal integer")?;
        let upper = U256::from_dec_str(&self.swap_pair.default_upper_bound)
            .with_context(|| "swap_pair.default_upper_bound is not a decimal integer")?;
        if lower > upper {
            anyhow::bail!("swap_pair bounds are inverted");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
