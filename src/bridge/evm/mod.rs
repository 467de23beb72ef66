//! EVM chain bridge
//!
//! Reads router events from transaction receipts and builds router calls as
//! legacy or EIP-1559 transactions. The unsigned transaction travels as its
//! JSON encoding; the signing digest is the transaction sighash.

pub mod abicoder;
pub mod address;
pub mod build;
pub mod logs;

use self::abicoder::format_address;
use self::build::build_router_call;
use super::{Bridge, BridgeContext, Detection, SignerBackend};
use crate::cache::BoundedCache;
use crate::config::ChainConfig;
use crate::error::{RouterError, RouterResult};
use crate::rpc::RpcClient;
use crate::swap::{
    eq_address, BuildTxArgs, DetectedLog, KeyType, RawTx, SignedTx, SourceTx, SwapRecord,
    SwapType, TxStatus,
};
use crate::tx::{GasEstimator, GasPrice};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::keccak256;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PROXY_MASTER_CACHE_SIZE: usize = 10_000;
const CODE_HASH_CACHE_SIZE: usize = 2_000;
const GET_PAIR: &str = "getPair(address,address)";

lazy_static! {
    static ref EIP1167_PROXY: Regex = Regex::new(
        r"^0x363d3d373d3d3d363d73([0-9a-fA-F]{40})5af43d82803e903d91602b57fd5bf3$"
    )
    .unwrap();
}

pub struct EvmBridge {
    config: ChainConfig,
    ctx: BridgeContext,
    rpc: RpcClient,
    gas: GasEstimator,
    proxy_masters: BoundedCache<String, Option<String>>,
    code_hashes: BoundedCache<String, String>,
}

impl EvmBridge {
    /// Build the bridge; performs no network I/O
    pub fn new(config: ChainConfig, ctx: BridgeContext) -> RouterResult<Self> {
        let rpc = ctx.rpc_client(&config)?;
        Ok(Self {
            gas: GasEstimator::new(config.max_gas_price_gwei),
            config,
            ctx,
            rpc,
            proxy_masters: BoundedCache::new(PROXY_MASTER_CACHE_SIZE),
            code_hashes: BoundedCache::new(CODE_HASH_CACHE_SIZE),
        })
    }

    pub fn create(config: ChainConfig, ctx: BridgeContext) -> RouterResult<Arc<dyn Bridge>> {
        Ok(Arc::new(Self::new(config, ctx)?))
    }

    async fn get_receipt(&self, tx_hash: &str) -> RouterResult<TransactionReceipt> {
        let receipt: Option<TransactionReceipt> = self
            .rpc
            .call_optional("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        let receipt = receipt.ok_or_else(|| RouterError::TxNotFound {
            tx_hash: tx_hash.to_string(),
        })?;
        if receipt.status != Some(U64::one()) {
            debug!(chain_id = self.config.chain_id, tx_hash, status = ?receipt.status, "Transaction not successful");
            return Err(RouterError::TxWithWrongStatus);
        }
        Ok(receipt)
    }

    async fn status_at(&self, receipt: &TransactionReceipt) -> RouterResult<TxStatus> {
        let height = receipt
            .block_number
            .ok_or(RouterError::TxNotStable)?
            .as_u64();
        let block: Option<Block<H256>> = self
            .rpc
            .call_optional("eth_getBlockByNumber", json!([format!("{:#x}", height), false]))
            .await?;
        let timestamp = block.map(|b| b.timestamp.low_u64()).unwrap_or_default();
        let latest = self.latest_height().await?;
        Ok(TxStatus::new(height, timestamp, latest))
    }

    /// Decode one receipt log into a record, `None` when it is not a swap of `swap_type`
    fn decode_log(
        &self,
        tx_hash: &str,
        receipt: &TransactionReceipt,
        status: &TxStatus,
        log_index: usize,
        swap_type: SwapType,
    ) -> Option<RouterResult<SwapRecord>> {
        let log = &receipt.logs[log_index];
        let decoder = logs::decoder_for(log.topics.first()?)?;
        if decoder.swap_type != swap_type {
            return None;
        }

        let result = decoder.decode(log).and_then(|decoded| {
            if log.removed == Some(true) {
                return Err(RouterError::TxWithRemovedLog);
            }
            Ok(SwapRecord {
                swap_type: decoded.swap_type,
                tx_hash: tx_hash.to_string(),
                log_index,
                from_chain_id: decoded.from_chain_id,
                to_chain_id: decoded.to_chain_id,
                from: decoded.from,
                bind: decoded.bind,
                token: decoded.token,
                token_id: String::new(),
                value: decoded.value,
                height: status.height,
                timestamp: status.timestamp,
                contract: format_address(log.address.as_bytes()),
                tx_to: receipt
                    .to
                    .map(|to| format_address(to.as_bytes()))
                    .unwrap_or_default(),
                payload: decoded.payload,
            })
        });
        if let Err(e) = &result {
            debug!(chain_id = self.config.chain_id, tx_hash, log_index, signature = decoder.signature, error = %e, "Swap log rejected");
        }
        Some(result)
    }

    fn decode_payload(raw: &RawTx) -> RouterResult<TypedTransaction> {
        serde_json::from_slice(&raw.payload)
            .map_err(|e| RouterError::WrongRawTx(format!("undecodable evm transaction: {}", e)))
    }

    fn check_sender(&self, from: &str) -> RouterResult<()> {
        let mpc = self
            .ctx
            .registry
            .router_mpc(self.config.chain_id)
            .ok_or(RouterError::MissRouterInfo)?;
        if !eq_address(from, &mpc) {
            return Err(RouterError::SenderMismatch {
                have: from.to_string(),
                want: mpc,
            });
        }
        Ok(())
    }

    fn typed_transaction(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
        nonce: u64,
        gas_limit: U256,
        gas_price: GasPrice,
    ) -> TypedTransaction {
        match gas_price {
            GasPrice::Legacy(price) => TypedTransaction::Legacy(
                TransactionRequest::new()
                    .from(from)
                    .to(to)
                    .data(data)
                    .nonce(nonce)
                    .gas(gas_limit)
                    .gas_price(price)
                    .chain_id(self.config.chain_id),
            ),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => TypedTransaction::Eip1559(
                Eip1559TransactionRequest::new()
                    .from(from)
                    .to(to)
                    .data(data)
                    .nonce(nonce)
                    .gas(gas_limit)
                    .max_fee_per_gas(max_fee_per_gas)
                    .max_priority_fee_per_gas(max_priority_fee_per_gas)
                    .chain_id(self.config.chain_id),
            ),
        }
    }

    async fn get_code(&self, contract: &str) -> RouterResult<Bytes> {
        self.rpc
            .call("eth_getCode", json!([contract, "latest"]))
            .await
    }
}

/// `r ‖ s ‖ v` from the quorum as an EIP-155 signature
fn signature_from_rsv(rsv: &str, chain_id: u64) -> RouterResult<Signature> {
    let wrong = |error: &str| RouterError::SignStatusWrong {
        status: "Success".into(),
        error: error.to_string(),
    };
    let bytes = hex::decode(rsv.trim_start_matches("0x")).map_err(|_| wrong("rsv is not hex"))?;
    if bytes.len() != 65 {
        return Err(wrong("rsv length is not 65"));
    }
    let recovery_id = match bytes[64] {
        v @ (0 | 1) => v as u64,
        v @ (27 | 28) => (v - 27) as u64,
        _ => return Err(wrong("rsv has invalid recovery id")),
    };
    Ok(Signature {
        r: U256::from_big_endian(&bytes[0..32]),
        s: U256::from_big_endian(&bytes[32..64]),
        v: recovery_id + 35 + chain_id * 2,
    })
}

#[async_trait]
impl Bridge for EvmBridge {
    fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    fn is_valid_address(&self, address: &str) -> bool {
        address::is_valid_address(address, self.config.check_address_mixed_case)
    }

    async fn latest_height(&self) -> RouterResult<u64> {
        let latest: U64 = self.rpc.call("eth_blockNumber", json!([])).await?;
        Ok(latest.as_u64())
    }

    async fn get_transaction(&self, tx_hash: &str) -> RouterResult<SourceTx> {
        let raw: Option<Value> = self
            .rpc
            .call_optional("eth_getTransactionByHash", json!([tx_hash]))
            .await?;
        let raw = raw.ok_or_else(|| RouterError::TxNotFound {
            tx_hash: tx_hash.to_string(),
        })?;
        let tx: Transaction = serde_json::from_value(raw.clone())
            .map_err(|e| RouterError::ParseData(format!("transaction {}: {}", tx_hash, e)))?;
        Ok(SourceTx {
            hash: format!("{:#x}", tx.hash),
            from: format_address(tx.from.as_bytes()),
            to: tx
                .to
                .map(|to| format_address(to.as_bytes()))
                .unwrap_or_default(),
            raw,
        })
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> RouterResult<TxStatus> {
        let receipt = self.get_receipt(tx_hash).await?;
        self.status_at(&receipt).await
    }

    async fn detect_swaps(
        &self,
        tx_hash: &str,
        swap_type: SwapType,
        log_index: Option<usize>,
    ) -> RouterResult<Detection> {
        let receipt = self.get_receipt(tx_hash).await?;
        let status = self.status_at(&receipt).await?;

        // Log 0 is the token movement itself
        let range = match log_index {
            Some(index) if index >= receipt.logs.len() => {
                return Err(RouterError::LogIndexOutOfRange)
            }
            Some(index) => index..index + 1,
            None => 1..receipt.logs.len(),
        };

        let logs = range
            .filter_map(|index| {
                self.decode_log(tx_hash, &receipt, &status, index, swap_type)
                    .map(|result| DetectedLog {
                        log_index: index,
                        result,
                    })
            })
            .collect();
        Ok(Detection { status, logs })
    }

    async fn build_raw_transaction(&self, args: &BuildTxArgs) -> RouterResult<RawTx> {
        let chain_id = self.config.chain_id;
        if args.record.to_chain_id != chain_id {
            return Err(RouterError::ToChainIdMismatch {
                have: args.record.to_chain_id,
                want: chain_id,
            });
        }
        self.check_sender(&args.from)?;

        let call = build_router_call(self.ctx.registry.as_ref(), chain_id, args)?;
        let from = address::parse_address(&args.from)?;
        let gas_limit = self.gas.gas_limit(self.config.gas_limit);
        let gas_price = self
            .gas
            .gas_price(&self.rpc, self.config.gas_price_strategy)
            .await?;

        let nonce = self
            .ctx
            .sequencer
            .next(chain_id, &args.from, || self.ledger_sequence(&args.from))
            .await?;

        let tx = self.typed_transaction(from, call.to, call.data, nonce, gas_limit, gas_price);
        let payload = match serde_json::to_vec(&tx) {
            Ok(payload) => payload,
            Err(e) => {
                self.ctx.sequencer.release(chain_id, &args.from, nonce).await;
                return Err(RouterError::Internal(format!("encode evm transaction: {}", e)));
            }
        };

        info!(chain_id, tx_hash = %args.record.tx_hash, log_index = args.record.log_index, nonce, "Built raw transaction");
        Ok(RawTx {
            chain_id,
            from: args.from.clone(),
            to: format_address(call.to.as_bytes()),
            sequence: nonce,
            payload: payload.into(),
            msg_hash: tx.sighash().as_bytes().to_vec().into(),
            key_type: KeyType::Ec256k1,
        })
    }

    async fn check_raw_transaction(&self, raw: &RawTx, args: &BuildTxArgs) -> RouterResult<()> {
        let chain_id = self.config.chain_id;
        if raw.chain_id != chain_id || args.record.to_chain_id != chain_id {
            return Err(RouterError::ToChainIdMismatch {
                have: args.record.to_chain_id,
                want: chain_id,
            });
        }
        if !eq_address(&raw.from, &args.from) {
            return Err(RouterError::WrongRawTx("sender differs from build args".into()));
        }
        self.check_sender(&args.from)?;

        let tx = Self::decode_payload(raw)?;
        let expected = build_router_call(self.ctx.registry.as_ref(), chain_id, args)?;
        if tx.to() != Some(&NameOrAddress::Address(expected.to)) {
            return Err(RouterError::WrongRawTx("receiver mismatch".into()));
        }
        if tx.data() != Some(&expected.data) {
            return Err(RouterError::WrongRawTx("input mismatch".into()));
        }
        if tx.chain_id() != Some(U64::from(chain_id)) {
            return Err(RouterError::WrongRawTx("chain id mismatch".into()));
        }
        if tx.nonce() != Some(&U256::from(raw.sequence)) {
            return Err(RouterError::WrongRawTx("nonce mismatch".into()));
        }
        if tx.value().map_or(false, |v| !v.is_zero()) {
            return Err(RouterError::WrongRawTx("transaction carries value".into()));
        }
        if tx.gas_price().map_or(false, |p| p > self.gas.max_price()) {
            return Err(RouterError::WrongRawTx("gas price above cap".into()));
        }
        if tx.sighash().as_bytes() != raw.msg_hash.as_ref() {
            return Err(RouterError::MsgHashMismatch);
        }
        Ok(())
    }

    async fn sign_transaction(
        &self,
        raw: &RawTx,
        args: &BuildTxArgs,
    ) -> RouterResult<(SignedTx, String)> {
        let tx = Self::decode_payload(raw)?;
        let sighash = tx.sighash();
        if sighash.as_bytes() != raw.msg_hash.as_ref() {
            return Err(RouterError::MsgHashMismatch);
        }

        let signature = match &self.ctx.signer {
            SignerBackend::Mpc(coordinator) => {
                let pub_key = self
                    .config
                    .mpc_public_key
                    .as_deref()
                    .ok_or(RouterError::MissMpcPublicKey)?;
                let rsv = coordinator.sign_raw(raw, args, pub_key).await?;
                let first = rsv.first().ok_or_else(|| RouterError::SignStatusWrong {
                    status: "Success".into(),
                    error: "no signature returned".into(),
                })?;
                signature_from_rsv(first, raw.chain_id)?
            }
            SignerBackend::LocalKeys(_) => {
                let key = self
                    .ctx
                    .signer
                    .local_key(raw.chain_id)?
                    .ok_or_else(|| RouterError::Wallet("no local key".into()))?;
                let wallet = LocalWallet::from_bytes(&key)
                    .map_err(|e| RouterError::Wallet(format!("invalid private key: {}", e)))?
                    .with_chain_id(raw.chain_id);
                wallet
                    .sign_transaction_sync(&tx)
                    .map_err(|e| RouterError::Wallet(e.to_string()))?
            }
        };

        let signer = signature
            .recover(sighash)
            .map_err(|_| RouterError::SignatureMismatch)?;
        if !eq_address(&format_address(signer.as_bytes()), &raw.from) {
            warn!(chain_id = raw.chain_id, signer = ?signer, from = %raw.from, "Signature from unexpected signer");
            return Err(RouterError::SignatureMismatch);
        }

        let signed = tx.rlp_signed(&signature);
        let tx_hash = format!("0x{}", hex::encode(keccak256(&signed)));
        info!(chain_id = raw.chain_id, tx_hash = %tx_hash, nonce = raw.sequence, "Signed transaction");
        Ok((
            SignedTx {
                chain_id: raw.chain_id,
                tx_hash: tx_hash.clone(),
                payload: signed,
            },
            tx_hash,
        ))
    }

    async fn send_transaction(&self, signed: &SignedTx) -> RouterResult<String> {
        let tx_hash: H256 = self
            .rpc
            .call("eth_sendRawTransaction", json!([signed.payload]))
            .await?;
        let tx_hash = format!("{:#x}", tx_hash);
        if !eq_address(&tx_hash, &signed.tx_hash) {
            warn!(chain_id = signed.chain_id, expected = %signed.tx_hash, returned = %tx_hash, "Node returned a different transaction hash");
        }
        Ok(tx_hash)
    }

    async fn ledger_sequence(&self, account: &str) -> RouterResult<u64> {
        let count: U256 = self
            .rpc
            .call("eth_getTransactionCount", json!([account, "pending"]))
            .await?;
        Ok(count.low_u64())
    }

    fn verify_msg_hash(&self, raw: &RawTx, msg_hashes: &[String]) -> RouterResult<()> {
        let tx = Self::decode_payload(raw)?;
        let sighash = tx.sighash();
        let expected = format!("{:#x}", sighash);
        match msg_hashes {
            [hash] if eq_address(hash, &expected) && sighash.as_bytes() == raw.msg_hash.as_ref() => {
                Ok(())
            }
            _ => Err(RouterError::MsgHashMismatch),
        }
    }

    async fn get_pair_for(
        &self,
        factory: &str,
        token0: &str,
        token1: &str,
    ) -> RouterResult<Option<String>> {
        let mut data = ethers::utils::id(GET_PAIR).to_vec();
        data.extend(ethers::abi::encode(&[
            ethers::abi::Token::Address(address::parse_address(token0)?),
            ethers::abi::Token::Address(address::parse_address(token1)?),
        ]));
        let result: Bytes = self
            .rpc
            .call(
                "eth_call",
                json!([{"to": factory, "data": Bytes::from(data)}, "latest"]),
            )
            .await?;
        let pair = abicoder::parse_address(&result, 0)?;
        if pair.trim_start_matches("0x").chars().all(|c| c == '0') {
            return Ok(None);
        }
        Ok(Some(pair))
    }

    async fn resolve_proxy_master(&self, contract: &str) -> RouterResult<Option<String>> {
        let key = contract.to_lowercase();
        if let Some(master) = self.proxy_masters.get(&key) {
            return Ok(master);
        }
        let code = self.get_code(contract).await?;
        let master = EIP1167_PROXY
            .captures(&format!("0x{}", hex::encode(&code)))
            .map(|caps| format!("0x{}", caps[1].to_lowercase()));
        self.proxy_masters.insert(key, master.clone());
        Ok(master)
    }

    async fn contract_code_hash(&self, contract: &str) -> RouterResult<Option<String>> {
        let key = contract.to_lowercase();
        if let Some(hash) = self.code_hashes.get(&key) {
            return Ok(Some(hash));
        }
        let code = self.get_code(contract).await?;
        if code.is_empty() {
            return Ok(None);
        }
        let hash = format!("0x{}", hex::encode(keccak256(&code)));
        self.code_hashes.insert(key, hash.clone());
        Ok(Some(hash))
    }
}
