//! Token and router registry
//!
//! Answers "which token is this address", "what does that token look like on
//! another chain" and "which router contract and MPC account serve a chain".
//! The static implementation is built once from [`Settings`].

use crate::config::{parse_amount, CallByContractConfig, ChainConfig, Settings};
use crate::error::{RouterError, RouterResult};
use crate::swap::eq_address;

use ethers::types::U256;
use std::collections::HashMap;

/// Per-chain deployment of a token, with amounts already parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDeployment {
    pub token_id: String,
    pub chain_id: u64,
    pub address: String,
    pub decimals: u8,
    pub router_contract: Option<String>,
    pub underlying: Option<String>,
    pub min_swap: Option<U256>,
    pub max_swap: Option<U256>,
}

/// Call-by-contract policy with chain keys parsed
#[derive(Debug, Clone, Default)]
pub struct CallPolicy {
    pub allow_all: bool,
    pub check_eip1167_master: bool,
    whitelist: HashMap<u64, Vec<String>>,
    code_hashes: HashMap<u64, Vec<String>>,
}

impl CallPolicy {
    pub fn from_config(cfg: &CallByContractConfig) -> RouterResult<Self> {
        Ok(Self {
            allow_all: cfg.allow_all,
            check_eip1167_master: cfg.check_eip1167_master,
            whitelist: parse_chain_keys(&cfg.whitelist)?,
            code_hashes: parse_chain_keys(&cfg.code_hash_whitelist)?,
        })
    }

    pub fn is_whitelisted(&self, chain_id: u64, caller: &str) -> bool {
        self.whitelist
            .get(&chain_id)
            .map_or(false, |list| list.iter().any(|a| eq_address(a, caller)))
    }

    pub fn has_code_hashes(&self, chain_id: u64) -> bool {
        self.code_hashes
            .get(&chain_id)
            .map_or(false, |list| !list.is_empty())
    }

    pub fn is_code_hash_allowed(&self, chain_id: u64, code_hash: &str) -> bool {
        self.code_hashes
            .get(&chain_id)
            .map_or(false, |list| list.iter().any(|h| eq_address(h, code_hash)))
    }
}

fn parse_chain_keys(input: &HashMap<String, Vec<String>>) -> RouterResult<HashMap<u64, Vec<String>>> {
    input
        .iter()
        .map(|(k, v)| {
            k.parse::<u64>()
                .map(|id| (id, v.clone()))
                .map_err(|_| RouterError::Config(format!("invalid chain key {}", k)))
        })
        .collect()
}

/// Read-only lookups over chains and tokens
pub trait TokenRegistry: Send + Sync {
    /// Chain configuration by id
    fn chain(&self, chain_id: u64) -> Option<ChainConfig>;

    /// Token id of a token address on a chain
    fn token_id_by_address(&self, chain_id: u64, address: &str) -> Option<String>;

    /// Token deployment on a chain
    fn token(&self, token_id: &str, chain_id: u64) -> Option<TokenDeployment>;

    /// Router serving a token on a chain; falls back to the chain router
    fn router_contract(&self, token_id: &str, chain_id: u64) -> Option<String> {
        self.token(token_id, chain_id)
            .and_then(|t| t.router_contract)
            .or_else(|| self.chain(chain_id).map(|c| c.router_contract))
    }

    /// Account of the signer quorum on a chain
    fn router_mpc(&self, chain_id: u64) -> Option<String> {
        self.chain(chain_id)
            .map(|c| c.router_mpc)
            .filter(|mpc| !mpc.is_empty())
    }

    fn call_policy(&self) -> &CallPolicy;
}

/// Registry built from configuration at startup
pub struct StaticRegistry {
    chains: HashMap<u64, ChainConfig>,
    tokens: HashMap<(String, u64), TokenDeployment>,
    by_address: HashMap<(u64, String), String>,
    policy: CallPolicy,
}

impl StaticRegistry {
    pub fn from_settings(settings: &Settings) -> RouterResult<Self> {
        let chains = settings
            .chains
            .values()
            .map(|c| (c.chain_id, c.clone()))
            .collect();

        let mut tokens = HashMap::new();
        let mut by_address = HashMap::new();
        for token in &settings.tokens {
            for (chain_key, cfg) in &token.chains {
                let chain_id: u64 = chain_key
                    .parse()
                    .map_err(|_| RouterError::Config(format!("invalid chain key {}", chain_key)))?;
                let deployment = TokenDeployment {
                    token_id: token.token_id.clone(),
                    chain_id,
                    address: cfg.address.clone(),
                    decimals: cfg.decimals,
                    router_contract: cfg.router_contract.clone(),
                    underlying: cfg.underlying.clone(),
                    min_swap: parse_amount(cfg.min_swap.as_deref())
                        .map_err(|e| RouterError::Config(e.to_string()))?,
                    max_swap: parse_amount(cfg.max_swap.as_deref())
                        .map_err(|e| RouterError::Config(e.to_string()))?,
                };
                by_address.insert(
                    (chain_id, cfg.address.to_lowercase()),
                    token.token_id.clone(),
                );
                tokens.insert((token.token_id.clone(), chain_id), deployment);
            }
        }

        Ok(Self {
            chains,
            tokens,
            by_address,
            policy: CallPolicy::from_config(&settings.call_by_contract)?,
        })
    }
}

impl TokenRegistry for StaticRegistry {
    fn chain(&self, chain_id: u64) -> Option<ChainConfig> {
        self.chains.get(&chain_id).cloned()
    }

    fn token_id_by_address(&self, chain_id: u64, address: &str) -> Option<String> {
        self.by_address
            .get(&(chain_id, address.to_lowercase()))
            .cloned()
    }

    fn token(&self, token_id: &str, chain_id: u64) -> Option<TokenDeployment> {
        self.tokens.get(&(token_id.to_string(), chain_id)).cloned()
    }

    fn call_policy(&self) -> &CallPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;

    fn registry() -> StaticRegistry {
        StaticRegistry::from_settings(&Settings::from_toml_str(SAMPLE).unwrap()).unwrap()
    }

    #[test]
    fn test_token_lookup() {
        let registry = registry();
        assert_eq!(
            registry.token_id_by_address(1, "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            Some("USDC".to_string())
        );
        let usdc = registry.token("USDC", 1).unwrap();
        assert_eq!(usdc.decimals, 6);
        assert_eq!(usdc.min_swap, Some(U256::from(1_000_000u64)));
        assert!(registry.token("USDC", 250).is_none());
    }

    #[test]
    fn test_router_fallback_to_chain() {
        let registry = registry();
        assert_eq!(
            registry.router_contract("USDC", 56).unwrap(),
            "0x3333333333333333333333333333333333333333"
        );
        assert_eq!(
            registry.router_mpc(1).unwrap(),
            "0x2222222222222222222222222222222222222222"
        );
    }

    #[test]
    fn test_call_policy() {
        let registry = registry();
        let policy = registry.call_policy();
        assert!(policy.is_whitelisted(1, "0x7777777777777777777777777777777777777777"));
        assert!(!policy.is_whitelisted(56, "0x7777777777777777777777777777777777777777"));
        assert!(!policy.has_code_hashes(1));
    }
}
