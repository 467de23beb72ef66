//! Configuration management for the swap router
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Chain, token and call-by-contract tables feed the static registry.

use crate::bridge::tron::address as tron;

use anyhow::{Context, Result};
use ethers::types::U256;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub router: RouterConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub mpc: MpcConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
    #[serde(default)]
    pub call_by_contract: CallByContractConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    pub instance_id: String,
    pub max_concurrent_swaps: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub rpc_timeout_secs: u64,
    pub swap_deadline_secs: u64,
    pub health_check_interval_secs: u64,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_trade_deadline")]
    pub trade_deadline_secs: u64,
    #[serde(default)]
    pub test_mode: bool,
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

/// Threshold signer (MPC) node settings
#[derive(Debug, Clone, Deserialize)]
pub struct MpcConfig {
    /// Prefix prepended to every RPC method, e.g. `dcrm_`
    pub api_prefix: String,
    pub rpc_address: String,
    /// Account of this node, used to list its pending sign requests
    pub node_address: String,
    pub group_id: String,
    /// Threshold in `t/n` form
    pub threshold: String,
    #[serde(default)]
    pub mode: String,
    pub sign_poll_interval_ms: u64,
    pub sign_deadline_secs: u64,
    pub rpc_timeout_secs: u64,
    #[serde(default)]
    pub accept_enabled: bool,
    #[serde(default = "default_accept_interval")]
    pub accept_interval_secs: u64,
    #[serde(default = "default_sign_info_expiry")]
    pub sign_info_expired_secs: i64,
}

/// Local key fallback, refused outside test mode
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignerConfig {
    #[serde(default)]
    pub sign_with_private_key: bool,
    /// Hex encoded secrets keyed by chain id
    #[serde(default)]
    pub private_keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    /// Bridge family used to pick the variant factory (`evm`, `near`,
    /// `stellar`, `tron`)
    pub family: String,
    pub rpc_urls: Vec<String>,
    /// Router contract, or deposit account on account-based ledgers
    pub router_contract: String,
    /// Address controlled by the signer quorum on this chain
    pub router_mpc: String,
    #[serde(default)]
    pub mpc_public_key: Option<String>,
    pub confirmations: u64,
    #[serde(default)]
    pub initial_height: u64,
    #[serde(default)]
    pub wrapped_native: Option<String>,
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default = "default_gas_strategy")]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default)]
    pub network_passphrase: Option<String>,
    #[serde(default)]
    pub base_fee: Option<u64>,
    #[serde(default)]
    pub check_address_mixed_case: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

/// A cross-chain token and its per-chain deployments
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub token_id: String,
    /// Keyed by chain id
    pub chains: HashMap<String, TokenChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenChainConfig {
    /// Multichain token address, or asset code on non-EVM ledgers
    pub address: String,
    pub decimals: u8,
    #[serde(default)]
    pub router_contract: Option<String>,
    #[serde(default)]
    pub underlying: Option<String>,
    /// Decimal integer in source-chain units
    #[serde(default)]
    pub min_swap: Option<String>,
    #[serde(default)]
    pub max_swap: Option<String>,
}

/// Rules for swaps initiated through an intermediate contract
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallByContractConfig {
    #[serde(default)]
    pub allow_all: bool,
    #[serde(default)]
    pub check_eip1167_master: bool,
    /// Allowed caller contracts keyed by chain id
    #[serde(default)]
    pub whitelist: HashMap<String, Vec<String>>,
    /// Allowed caller code hashes keyed by chain id
    #[serde(default)]
    pub code_hash_whitelist: HashMap<String, Vec<String>>,
}

fn default_queue_size() -> usize {
    1024
}

fn default_trade_deadline() -> u64 {
    600
}

fn default_accept_interval() -> u64 {
    5
}

fn default_sign_info_expiry() -> i64 {
    3600
}

fn default_gas_strategy() -> GasPriceStrategy {
    GasPriceStrategy::Legacy
}

fn default_max_gas_price() -> u64 {
    500
}

fn default_gas_limit() -> u64 {
    300_000
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAP_ROUTER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let mut settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.normalize_tron_addresses()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        let mut seen = HashSet::new();
        for (name, chain) in &self.chains {
            if !seen.insert(chain.chain_id) {
                anyhow::bail!("Chain id {} is configured twice", chain.chain_id);
            }
            if chain.enabled {
                if chain.rpc_urls.is_empty() {
                    anyhow::bail!("Chain {} has no RPC URLs configured", name);
                }
                if chain.router_contract.is_empty() {
                    anyhow::bail!("Chain {} has no router contract", name);
                }
                if chain.router_mpc.is_empty() {
                    tracing::warn!("Chain {} has no router mpc - cannot be a destination", name);
                }
            }
        }

        for token in &self.tokens {
            for (chain_key, cfg) in &token.chains {
                let chain_id: u64 = chain_key.parse().with_context(|| {
                    format!("Token {} has invalid chain key {}", token.token_id, chain_key)
                })?;
                if self.get_chain_by_id(chain_id).is_none() {
                    anyhow::bail!("Token {} references unknown chain {}", token.token_id, chain_id);
                }
                // 10^77 is the largest power of ten in a U256
                if cfg.decimals > 77 {
                    anyhow::bail!("Token {} has invalid decimals {}", token.token_id, cfg.decimals);
                }
                let min = parse_amount(cfg.min_swap.as_deref())?;
                let max = parse_amount(cfg.max_swap.as_deref())?;
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        anyhow::bail!("Token {} has min_swap above max_swap", token.token_id);
                    }
                }
            }
        }

        if self.mpc.sign_poll_interval_ms == 0 {
            anyhow::bail!("mpc.sign_poll_interval_ms must be positive");
        }

        if self.signer.sign_with_private_key && !self.router.test_mode {
            anyhow::bail!("Private key signing is only allowed in test mode");
        }

        Ok(())
    }

    /// Tron ids may be written in base58check; everything downstream
    /// compares the 20-byte hex form
    fn normalize_tron_addresses(&mut self) -> Result<()> {
        let to_hex = |address: &str| -> Result<String> {
            tron::to_hex(address).with_context(|| format!("Invalid tron address {}", address))
        };
        let mut tron_chains = HashSet::new();
        for chain in self.chains.values_mut() {
            if !chain.enabled || !chain.family.eq_ignore_ascii_case("tron") {
                continue;
            }
            tron_chains.insert(chain.chain_id.to_string());
            chain.router_contract = to_hex(&chain.router_contract)?;
            if !chain.router_mpc.is_empty() {
                chain.router_mpc = to_hex(&chain.router_mpc)?;
            }
            for address in [&mut chain.wrapped_native, &mut chain.factory].into_iter().flatten() {
                *address = to_hex(address.as_str())?;
            }
        }

        for token in &mut self.tokens {
            for (chain_key, cfg) in token.chains.iter_mut() {
                if !tron_chains.contains(chain_key) {
                    continue;
                }
                cfg.address = to_hex(&cfg.address)?;
                for address in [&mut cfg.router_contract, &mut cfg.underlying].into_iter().flatten() {
                    *address = to_hex(address.as_str())?;
                }
            }
        }
        for (chain_key, callers) in self.call_by_contract.whitelist.iter_mut() {
            if tron_chains.contains(chain_key) {
                for caller in callers.iter_mut() {
                    *caller = to_hex(caller.as_str())?;
                }
            }
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
}

/// Parse an optional decimal integer amount
pub fn parse_amount(value: Option<&str>) -> Result<Option<U256>> {
    value
        .map(|v| {
            U256::from_dec_str(v.trim()).map_err(|e| anyhow::anyhow!("invalid amount {}: {}", v, e))
        })
        .transpose()
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
