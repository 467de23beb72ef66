//! Cross-chain consistency validation
//!
//! A swap record reaches the signer only after it passes, in order:
//! - stability (confirmations and initial height)
//! - contract authenticity, including call-by-contract rules
//! - source chain id agreement
//! - token resolution on both chains and destination bridge lookup
//! - value bounds and decimal conversion
//! - bind address validity on the destination
//! - trade path validity on the destination factory

mod value;

pub use value::{check_swap_value, destination_amount};

use crate::bridge::{Bridge, BridgeRegistry};
use crate::config::ChainConfig;
use crate::error::{RouterError, RouterResult};
use crate::registry::{TokenDeployment, TokenRegistry};
use crate::swap::{eq_address, SwapPayload, SwapRecord, TxStatus};

use std::sync::Arc;
use tracing::warn;

/// Token deployments and destination bridge of a swap
pub struct ResolvedSwap {
    pub from_token: TokenDeployment,
    pub to_token: TokenDeployment,
    pub dest: Arc<dyn Bridge>,
}

pub struct ConsistencyValidator {
    registry: Arc<dyn TokenRegistry>,
    bridges: Arc<BridgeRegistry>,
}

impl ConsistencyValidator {
    pub fn new(registry: Arc<dyn TokenRegistry>, bridges: Arc<BridgeRegistry>) -> Self {
        Self { registry, bridges }
    }

    /// Run every check against a record decoded by `source`
    pub async fn validate(
        &self,
        source: &dyn Bridge,
        record: &SwapRecord,
        status: &TxStatus,
        allow_unstable: bool,
    ) -> RouterResult<()> {
        check_stability(source.chain_config(), status, allow_unstable)?;
        self.check_contract(source, record).await?;
        check_chain_id(source.chain_id(), record)?;

        if let SwapPayload::AnyCall(info) = &record.payload {
            let dest = self.bridges.get(record.to_chain_id)?;
            return match info.call_to.iter().find(|to| !dest.is_valid_address(to)) {
                Some(bad) => Err(RouterError::WrongBindAddress(bad.clone())),
                None => Ok(()),
            };
        }

        let resolved = self.resolve(record)?;
        check_swap_value(record.value, &resolved.from_token, &resolved.to_token)?;
        self.check_bind(record, resolved.dest.as_ref())?;

        if let SwapPayload::Trade { .. } = &record.payload {
            self.check_trade_path(record, &resolved).await?;
        }
        Ok(())
    }

    /// Emitting contract must be the router; a different callee must be allow-listed
    pub async fn check_contract(&self, source: &dyn Bridge, record: &SwapRecord) -> RouterResult<()> {
        let chain_id = source.chain_id();
        let router = self
            .registry
            .router_contract(&record.token_id, chain_id)
            .ok_or(RouterError::MissRouterInfo)?;

        if !eq_address(&record.contract, &router) {
            warn!(chain_id, tx_hash = %record.tx_hash, contract = %record.contract, "Swap emitted by unknown contract");
            return Err(RouterError::TxWithWrongContract);
        }
        if eq_address(&record.tx_to, &router) {
            return Ok(());
        }

        let policy = self.registry.call_policy();
        let caller = record.tx_to.as_str();
        if policy.allow_all || policy.is_whitelisted(chain_id, caller) {
            return Ok(());
        }
        if policy.check_eip1167_master {
            if let Some(master) = source.resolve_proxy_master(caller).await? {
                if policy.is_whitelisted(chain_id, &master) {
                    return Ok(());
                }
            }
        }
        if policy.has_code_hashes(chain_id) {
            if let Some(code_hash) = source.contract_code_hash(caller).await? {
                if policy.is_code_hash_allowed(chain_id, &code_hash) {
                    return Ok(());
                }
            }
        }

        warn!(chain_id, tx_hash = %record.tx_hash, caller, "Swap called by contract not allowed");
        Err(RouterError::TxWithWrongContract)
    }

    /// Token deployments on both chains and the destination bridge
    pub fn resolve(&self, record: &SwapRecord) -> RouterResult<ResolvedSwap> {
        if record.token_id.is_empty() {
            return Err(RouterError::MissTokenConfig);
        }
        let from_token = self
            .registry
            .token(&record.token_id, record.from_chain_id)
            .ok_or(RouterError::MissTokenConfig)?;
        let to_token = self
            .registry
            .token(&record.token_id, record.to_chain_id)
            .ok_or_else(|| {
                warn!(token_id = %record.token_id, to_chain_id = record.to_chain_id, "No multichain token");
                RouterError::MissTokenConfig
            })?;
        let dest = self.bridges.get(record.to_chain_id)?;
        Ok(ResolvedSwap {
            from_token,
            to_token,
            dest,
        })
    }

    fn check_bind(&self, record: &SwapRecord, dest: &dyn Bridge) -> RouterResult<()> {
        if !dest.is_valid_address(&record.bind) {
            warn!(tx_hash = %record.tx_hash, log_index = record.log_index, bind = %record.bind, "Wrong bind address");
            return Err(RouterError::WrongBindAddress(record.bind.clone()));
        }
        if let SwapPayload::CallProxy { call_proxy, .. } = &record.payload {
            if !dest.is_valid_address(call_proxy) {
                return Err(RouterError::WrongBindAddress(call_proxy.clone()));
            }
        }
        Ok(())
    }

    /// First hop is the multichain token or its underlying, every hop pair
    /// exists on the destination factory, and native trades end in wNative
    pub async fn check_trade_path(
        &self,
        record: &SwapRecord,
        resolved: &ResolvedSwap,
    ) -> RouterResult<()> {
        let (path, for_native) = match &record.payload {
            SwapPayload::Trade {
                path, for_native, ..
            } => (path, *for_native),
            _ => return Err(RouterError::SwapTypeNotSupported),
        };
        if path.len() < 2 {
            return Err(RouterError::TxWithWrongPath);
        }

        let first = &path[0];
        let multichain = &resolved.to_token.address;
        let from_underlying = resolved
            .to_token
            .underlying
            .as_deref()
            .map_or(false, |u| eq_address(first, u));
        if !(eq_address(first, multichain) || from_underlying) {
            warn!(tx_hash = %record.tx_hash, token = %first, "Trade path starts with wrong token");
            return Err(RouterError::TxWithWrongPath);
        }

        let dest_chain = self
            .registry
            .chain(record.to_chain_id)
            .ok_or(RouterError::MissRouterInfo)?;
        if for_native {
            let wnative = dest_chain
                .wrapped_native
                .as_deref()
                .ok_or(RouterError::SwapTradeNotSupported)?;
            let last = &path[path.len() - 1];
            if !eq_address(last, wnative) {
                warn!(tx_hash = %record.tx_hash, token = %last, "Trade path does not end in wrapped native");
                return Err(RouterError::TxWithWrongPath);
            }
        }

        let factory = dest_chain
            .factory
            .as_deref()
            .ok_or(RouterError::SwapTradeNotSupported)?;
        for hop in path.windows(2) {
            if resolved.dest.get_pair_for(factory, &hop[0], &hop[1]).await?.is_none() {
                warn!(tx_hash = %record.tx_hash, token0 = %hop[0], token1 = %hop[1], "Trade pair not found");
                return Err(RouterError::TxWithWrongPath);
            }
        }
        Ok(())
    }
}

/// Confirmation gate. The initial height applies even to unstable queries.
pub fn check_stability(
    chain: &ChainConfig,
    status: &TxStatus,
    allow_unstable: bool,
) -> RouterResult<()> {
    if status.height < chain.initial_height {
        return Err(RouterError::TxBeforeInitialHeight {
            height: status.height,
            initial: chain.initial_height,
        });
    }
    if !allow_unstable && status.confirmations < chain.confirmations {
        return Err(RouterError::TxNotStable);
    }
    Ok(())
}

pub fn check_chain_id(chain_id: u64, record: &SwapRecord) -> RouterResult<()> {
    if record.from_chain_id != chain_id {
        warn!(tx_hash = %record.tx_hash, log_index = record.log_index, from_chain_id = record.from_chain_id, chain_id, "Mismatched source chain id");
        return Err(RouterError::FromChainIdMismatch {
            have: record.from_chain_id,
            want: chain_id,
        });
    }
    Ok(())
}
