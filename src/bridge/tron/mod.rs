//! TRON source bridge
//!
//! TRON nodes serve an Ethereum compatible JSON-RPC whose receipts carry the
//! router's EVM events, so detection runs through [`EvmBridge`]. Native
//! transaction ids are 64 hex digits without `0x`; records keep that form
//! and the 20-byte hex addresses the logs carry. Destination transactions are
//! never built for this family.

pub mod address;

use super::evm::EvmBridge;
use super::{Bridge, BridgeContext, Detection};
use crate::config::ChainConfig;
use crate::error::{RouterError, RouterResult};
use crate::swap::{BuildTxArgs, RawTx, SignedTx, SourceTx, SwapType, TxStatus};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct TronBridge {
    config: ChainConfig,
    evm: EvmBridge,
}

/// Native transaction id: lowercase hex without `0x`
fn native_hash(tx_hash: &str) -> String {
    tx_hash
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .to_lowercase()
}

fn rpc_hash(tx_hash: &str) -> String {
    format!("0x{}", native_hash(tx_hash))
}

impl TronBridge {
    /// Build the bridge; performs no network I/O
    pub fn new(config: ChainConfig, ctx: BridgeContext) -> RouterResult<Self> {
        Ok(Self {
            evm: EvmBridge::new(config.clone(), ctx)?,
            config,
        })
    }

    pub fn create(config: ChainConfig, ctx: BridgeContext) -> RouterResult<Arc<dyn Bridge>> {
        Ok(Arc::new(Self::new(config, ctx)?))
    }

    fn not_a_destination(&self) -> RouterError {
        RouterError::NotADestination {
            chain_id: self.config.chain_id,
        }
    }
}

#[async_trait]
impl Bridge for TronBridge {
    fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    fn is_valid_address(&self, address: &str) -> bool {
        address::is_valid_address(address)
    }

    async fn latest_height(&self) -> RouterResult<u64> {
        self.evm.latest_height().await
    }

    async fn get_transaction(&self, tx_hash: &str) -> RouterResult<SourceTx> {
        let mut tx = self.evm.get_transaction(&rpc_hash(tx_hash)).await?;
        tx.hash = native_hash(&tx.hash);
        Ok(tx)
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> RouterResult<TxStatus> {
        self.evm.get_transaction_status(&rpc_hash(tx_hash)).await
    }

    async fn detect_swaps(
        &self,
        tx_hash: &str,
        swap_type: SwapType,
        log_index: Option<usize>,
    ) -> RouterResult<Detection> {
        let mut detection = self
            .evm
            .detect_swaps(&rpc_hash(tx_hash), swap_type, log_index)
            .await?;
        let native = native_hash(tx_hash);
        for log in detection.logs.iter_mut() {
            if let Ok(record) = log.result.as_mut() {
                record.tx_hash = native.clone();
            }
        }
        debug!(chain_id = self.config.chain_id, tx_hash = %native, candidates = detection.logs.len(), "Tron swaps detected");
        Ok(detection)
    }

    async fn build_raw_transaction(&self, _args: &BuildTxArgs) -> RouterResult<RawTx> {
        Err(self.not_a_destination())
    }

    async fn check_raw_transaction(&self, _raw: &RawTx, _args: &BuildTxArgs) -> RouterResult<()> {
        Err(self.not_a_destination())
    }

    async fn sign_transaction(
        &self,
        _raw: &RawTx,
        _args: &BuildTxArgs,
    ) -> RouterResult<(SignedTx, String)> {
        Err(self.not_a_destination())
    }

    async fn send_transaction(&self, _signed: &SignedTx) -> RouterResult<String> {
        Err(self.not_a_destination())
    }

    async fn ledger_sequence(&self, _account: &str) -> RouterResult<u64> {
        Err(self.not_a_destination())
    }

    fn verify_msg_hash(&self, _raw: &RawTx, _msg_hashes: &[String]) -> RouterResult<()> {
        Err(self.not_a_destination())
    }

    async fn resolve_proxy_master(&self, contract: &str) -> RouterResult<Option<String>> {
        self.evm.resolve_proxy_master(&address::to_hex(contract)?).await
    }

    async fn contract_code_hash(&self, contract: &str) -> RouterResult<Option<String>> {
        self.evm.contract_code_hash(&address::to_hex(contract)?).await
    }
}
