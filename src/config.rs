//! Configuration management for the bridge orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::exec::DriverConfig;
use crate::quote::QuoteConfig;

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    pub quote: QuoteSettings,
    pub storage: StorageConfig,
    pub bridge: BridgeConfig,
    pub venue: VenueConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub instance_id: String,
    pub receipt_poll_secs: u64,
    pub receipt_timeout_secs: u64,
    pub arrival_poll_secs: u64,
    pub arrival_timeout_secs: u64,
    pub l1_poll_secs: u64,
    pub l1_timeout_secs: u64,
    /// Cadence of background bridge status polling for resumed transactions
    pub history_poll_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteSettings {
    pub debounce_ms: u64,
    pub stale_after_secs: u64,
    pub refresh_interval_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Account substituted when pricing without a connected wallet
    pub placeholder_account: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub path: String,
    pub retention_days: i64,
    pub prune_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    pub base_url: String,
    pub deposit_chain_id: u64,
    pub deposit_token: String,
    pub deposit_contract: String,
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
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub enabled: bool,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("ORCHESTRATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Load settings for a specific environment
    pub fn load_env(env_name: &str) -> Result<Self> {
        let config_path = PathBuf::from(format!("config/{}.toml", env_name));
        env::set_var("ORCHESTRATOR_CONFIG", config_path.to_str().unwrap());
        Self::load()
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        if self.storage.path.is_empty() {
            anyhow::bail!("storage.path must be set");
        }
        if self.storage.retention_days <= 0 {
            anyhow::bail!("storage.retention_days must be positive");
        }

        parse_address(&self.venue.deposit_token)
            .with_context(|| "venue.deposit_token is not a valid address")?;
        parse_address(&self.venue.deposit_contract)
            .with_context(|| "venue.deposit_contract is not a valid address")?;
        parse_address(&self.quote.placeholder_account)
            .with_context(|| "quote.placeholder_account is not a valid address")?;

        if self
            .get_chain_by_id(self.venue.deposit_chain_id)
            .is_none()
        {
            anyhow::bail!(
                "venue.deposit_chain_id {} is not among the configured chains",
                self.venue.deposit_chain_id
            );
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }

    /// Timing bounds for the execution driver
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            receipt_poll: Duration::from_secs(self.orchestrator.receipt_poll_secs),
            receipt_timeout: Duration::from_secs(self.orchestrator.receipt_timeout_secs),
            arrival_poll: Duration::from_secs(self.orchestrator.arrival_poll_secs),
            arrival_timeout: Duration::from_secs(self.orchestrator.arrival_timeout_secs),
            l1_poll: Duration::from_secs(self.orchestrator.l1_poll_secs),
            l1_timeout: Duration::from_secs(self.orchestrator.l1_timeout_secs),
        }
    }

    /// Tuning for the quote pipeline
    pub fn quote_config(&self) -> Result<QuoteConfig> {
        Ok(QuoteConfig {
            debounce: Duration::from_millis(self.quote.debounce_ms),
            stale_after: Duration::from_secs(self.quote.stale_after_secs),
            refresh_interval: Duration::from_secs(self.quote.refresh_interval_secs),
            max_retries: self.quote.max_retries,
            retry_delay: Duration::from_millis(self.quote.retry_delay_ms),
            placeholder_account: parse_address(&self.quote.placeholder_account)?,
        })
    }
}

impl VenueConfig {
    pub fn deposit_token_address(&self) -> Result<Address> {
        parse_address(&self.deposit_token)
    }

    pub fn deposit_contract_address(&self) -> Result<Address> {
        parse_address(&self.deposit_contract)
    }
}

fn parse_address(s: &str) -> Result<Address> {
    s.parse::<Address>()
        .map_err(|e| anyhow::anyhow!("Invalid address {}: {}", s, e))
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
