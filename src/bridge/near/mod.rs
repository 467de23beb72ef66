//! NEAR chain bridge
//!
//! Swaps are announced by the router account as `LogSwapOut` text logs.
//! Destination transactions are a single `any_swap_in` function call on the
//! router; the unsigned transaction travels in its borsh encoding and the
//! signing digest is its sha256.

pub mod address;
pub mod types;

use self::address::{is_valid_account_id, parse_public_key};
use self::types::{
    AccessKeyView, Action, BlockView, FunctionCallAction, PublicKey, Signature, SignedTransaction,
    Transaction, TransactionResult, ED25519,
};
use super::{Bridge, BridgeContext, Detection, SignerBackend};
use crate::config::ChainConfig;
use crate::error::{RouterError, RouterResult};
use crate::rpc::RpcClient;
use crate::swap::{
    eq_address, BuildTxArgs, DetectedLog, KeyType, RawTx, SignedTx, SourceTx, SwapPayload,
    SwapRecord, SwapType, TxStatus,
};
use crate::validate::destination_amount;

use async_trait::async_trait;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use ethers::types::U256;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SWAP_OUT_LOG: &str = "LogSwapOut";
const SWAP_OUT_WORDS: usize = 13;
const ANY_SWAP_IN: &str = "any_swap_in";
/// Node error name for a hash it has never seen
const UNKNOWN_TRANSACTION: &str = "UNKNOWN_TRANSACTION";
/// 300 Tgas, the per-call maximum
const SWAP_IN_GAS: u64 = 300_000_000_000_000;

/// Fields of a `LogSwapOut` line
#[derive(Debug, Clone, PartialEq, Eq)]
struct SwapOutLog {
    token: String,
    from: String,
    bind: String,
    value: U256,
    from_chain_id: u64,
    to_chain_id: u64,
}

/// `LogSwapOut token <t> from <f> to <bind> amount <v> fromChainId <c> toChainId <c>`.
/// `None` for any other line.
fn parse_swap_out(line: &str) -> Option<RouterResult<SwapOutLog>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.len() != SWAP_OUT_WORDS || words[0] != SWAP_OUT_LOG {
        return None;
    }
    Some(swap_out_fields(&words))
}

fn swap_out_fields(words: &[&str]) -> RouterResult<SwapOutLog> {
    let chain_id = |word: &str| {
        word.parse::<u64>()
            .map_err(|_| RouterError::ParseData(format!("invalid chain id {}", word)))
    };
    Ok(SwapOutLog {
        token: words[2].to_string(),
        from: words[4].to_string(),
        bind: words[6].to_string(),
        value: U256::from_dec_str(words[8])
            .map_err(|_| RouterError::ParseData(format!("invalid amount {}", words[8])))?,
        from_chain_id: chain_id(words[10])?,
        to_chain_id: chain_id(words[12])?,
    })
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

fn decode_block_hash(hash: &str) -> RouterResult<[u8; 32]> {
    bs58::decode(hash)
        .into_vec()
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| RouterError::ParseData(format!("invalid block hash {}", hash)))
}

pub struct NearBridge {
    config: ChainConfig,
    ctx: BridgeContext,
    rpc: RpcClient,
}

impl NearBridge {
    pub fn new(config: ChainConfig, ctx: BridgeContext) -> RouterResult<Self> {
        let rpc = ctx.rpc_client(&config)?;
        Ok(Self { config, ctx, rpc })
    }

    pub fn create(config: ChainConfig, ctx: BridgeContext) -> RouterResult<Arc<dyn Bridge>> {
        Ok(Arc::new(Self::new(config, ctx)?))
    }

    async fn final_block(&self) -> RouterResult<BlockView> {
        self.rpc.call("block", json!({"finality": "final"})).await
    }

    async fn tx_result(&self, tx_hash: &str) -> RouterResult<TransactionResult> {
        let not_found = || RouterError::TxNotFound {
            tx_hash: tx_hash.to_string(),
        };
        let result: TransactionResult = self
            .rpc
            .call_unless_missing(
                "tx",
                json!([tx_hash, self.config.router_contract]),
                &[UNKNOWN_TRANSACTION],
            )
            .await?
            .ok_or_else(|| {
                debug!(chain_id = self.config.chain_id, tx_hash, "Transaction unknown to every endpoint");
                not_found()
            })?;
        if result.transaction.hash != tx_hash {
            return Err(not_found());
        }
        Ok(result)
    }

    async fn status_of(&self, result: &TransactionResult) -> RouterResult<TxStatus> {
        if result.status.is_failure() {
            return Err(RouterError::TxWithWrongStatus);
        }
        let block: BlockView = self
            .rpc
            .call(
                "block",
                json!({"block_id": result.transaction_outcome.block_hash}),
            )
            .await?;
        let latest = self.final_block().await?.header.height;
        Ok(TxStatus::new(
            block.header.height,
            block.header.timestamp / 1_000_000_000,
            latest,
        ))
    }

    fn to_record(
        &self,
        tx_hash: &str,
        log_index: usize,
        status: &TxStatus,
        log: SwapOutLog,
    ) -> RouterResult<SwapRecord> {
        let router = &self.config.router_contract;
        if eq_address(&log.from, router) {
            return Err(RouterError::TxWithWrongSender);
        }
        // Receipts are executed by the router itself; the outer receiver is
        // the token contract, so the callee recorded is the router
        Ok(SwapRecord {
            swap_type: SwapType::SimpleTransfer,
            tx_hash: tx_hash.to_string(),
            log_index,
            from_chain_id: log.from_chain_id,
            to_chain_id: log.to_chain_id,
            from: log.from,
            bind: log.bind,
            token: log.token,
            token_id: String::new(),
            value: log.value,
            height: status.height,
            timestamp: status.timestamp,
            contract: router.clone(),
            tx_to: router.clone(),
            payload: SwapPayload::Transfer,
        })
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

    fn public_key(&self) -> RouterResult<(&str, [u8; 32])> {
        let key = self
            .config
            .mpc_public_key
            .as_deref()
            .ok_or(RouterError::MissMpcPublicKey)?;
        Ok((key, parse_public_key(key)?))
    }

    /// Router account and the `any_swap_in` call paying out `args`
    fn swap_in_call(&self, args: &BuildTxArgs) -> RouterResult<(String, Action)> {
        let record = &args.record;
        if record.swap_type != SwapType::SimpleTransfer {
            return Err(RouterError::SwapTypeNotSupported);
        }
        if !is_valid_account_id(&record.bind) {
            return Err(RouterError::WrongBindAddress(record.bind.clone()));
        }
        let registry = self.ctx.registry.as_ref();
        let receiver = registry
            .router_contract(&record.token_id, self.config.chain_id)
            .ok_or(RouterError::MissRouterInfo)?;
        let (to_token, amount) = destination_amount(registry, record)?;
        let call_args = json!({
            "tx": record.tx_hash,
            "token": to_token.address,
            "to": record.bind,
            "amount": amount.to_string(),
            "from_chain_id": record.from_chain_id.to_string(),
        });
        let action = Action::FunctionCall(FunctionCallAction {
            method_name: ANY_SWAP_IN.to_string(),
            args: call_args.to_string().into_bytes(),
            gas: SWAP_IN_GAS,
            deposit: 0,
        });
        Ok((receiver, action))
    }

    fn decode_payload(raw: &RawTx) -> RouterResult<Transaction> {
        borsh::from_slice(&raw.payload)
            .map_err(|e| RouterError::WrongRawTx(format!("undecodable near transaction: {}", e)))
    }

    fn quorum_signature(rsv: &[String]) -> RouterResult<[u8; 64]> {
        let wrong = |error: &str| RouterError::SignStatusWrong {
            status: "Success".into(),
            error: error.to_string(),
        };
        let first = rsv.first().ok_or_else(|| wrong("no signature returned"))?;
        let bytes = hex::decode(first.trim_start_matches("0x"))
            .map_err(|_| wrong("signature is not hex"))?;
        bytes
            .try_into()
            .map_err(|_| wrong("signature length is not 64"))
    }
}

#[async_trait]
impl Bridge for NearBridge {
    fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    fn is_valid_address(&self, address: &str) -> bool {
        is_valid_account_id(address)
    }

    async fn latest_height(&self) -> RouterResult<u64> {
        Ok(self.final_block().await?.header.height)
    }

    async fn get_transaction(&self, tx_hash: &str) -> RouterResult<SourceTx> {
        let raw: serde_json::Value = self
            .rpc
            .call("tx", json!([tx_hash, self.config.router_contract]))
            .await?;
        let result: TransactionResult = serde_json::from_value(raw.clone())
            .map_err(|e| RouterError::ParseData(format!("transaction {}: {}", tx_hash, e)))?;
        Ok(SourceTx {
            hash: result.transaction.hash,
            from: result.transaction.signer_id,
            to: result.transaction.receiver_id,
            raw,
        })
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> RouterResult<TxStatus> {
        let result = self.tx_result(tx_hash).await?;
        self.status_of(&result).await
    }

    async fn detect_swaps(
        &self,
        tx_hash: &str,
        swap_type: SwapType,
        log_index: Option<usize>,
    ) -> RouterResult<Detection> {
        if swap_type != SwapType::SimpleTransfer {
            return Err(RouterError::SwapTypeNotSupported);
        }
        let result = self.tx_result(tx_hash).await?;
        let status = self.status_of(&result).await?;
        let lines = result.logs_of(&self.config.router_contract);

        let range = match log_index {
            Some(index) if index >= lines.len() => return Err(RouterError::LogIndexOutOfRange),
            Some(index) => index..index + 1,
            None => 0..lines.len(),
        };

        let logs = range
            .filter_map(|index| {
                let parsed = parse_swap_out(lines[index])?;
                let result = parsed.and_then(|log| self.to_record(tx_hash, index, &status, log));
                if let Err(e) = &result {
                    debug!(chain_id = self.config.chain_id, tx_hash, log_index = index, error = %e, "Swap log rejected");
                }
                Some(DetectedLog {
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

        let (receiver, action) = self.swap_in_call(args)?;
        let (_, key) = self.public_key()?;
        let block_hash = decode_block_hash(&self.final_block().await?.header.hash)?;

        let nonce = self
            .ctx
            .sequencer
            .next(chain_id, &args.from, || self.ledger_sequence(&args.from))
            .await?;

        let tx = Transaction {
            signer_id: args.from.clone(),
            public_key: PublicKey::ed25519(key),
            nonce,
            receiver_id: receiver.clone(),
            block_hash,
            actions: vec![action],
        };
        let payload = match borsh::to_vec(&tx) {
            Ok(payload) => payload,
            Err(e) => {
                self.ctx.sequencer.release(chain_id, &args.from, nonce).await;
                return Err(RouterError::Internal(format!("encode near transaction: {}", e)));
            }
        };

        info!(chain_id, tx_hash = %args.record.tx_hash, log_index = args.record.log_index, nonce, "Built raw transaction");
        Ok(RawTx {
            chain_id,
            from: args.from.clone(),
            to: receiver,
            sequence: nonce,
            msg_hash: sha256(&payload).to_vec().into(),
            payload: payload.into(),
            key_type: KeyType::Ed25519,
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
        if raw.from != args.from {
            return Err(RouterError::WrongRawTx("sender differs from build args".into()));
        }
        self.check_sender(&args.from)?;

        let tx = Self::decode_payload(raw)?;
        let (receiver, action) = self.swap_in_call(args)?;
        let (_, key) = self.public_key()?;
        if tx.signer_id != args.from {
            return Err(RouterError::WrongRawTx("signer mismatch".into()));
        }
        if tx.public_key != PublicKey::ed25519(key) {
            return Err(RouterError::WrongRawTx("public key mismatch".into()));
        }
        if tx.receiver_id != receiver || raw.to != receiver {
            return Err(RouterError::WrongRawTx("receiver mismatch".into()));
        }
        if tx.actions != [action] {
            return Err(RouterError::WrongRawTx("actions mismatch".into()));
        }
        if tx.nonce != raw.sequence {
            return Err(RouterError::WrongRawTx("nonce mismatch".into()));
        }
        if sha256(&raw.payload)[..] != raw.msg_hash[..] {
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
        let digest = sha256(&raw.payload);
        if digest[..] != raw.msg_hash[..] {
            return Err(RouterError::MsgHashMismatch);
        }

        let signature = match &self.ctx.signer {
            SignerBackend::Mpc(coordinator) => {
                let (pub_key, _) = self.public_key()?;
                let rsv = coordinator.sign_raw(raw, args, pub_key).await?;
                Self::quorum_signature(&rsv)?
            }
            SignerBackend::LocalKeys(_) => {
                let seed: [u8; 32] = self
                    .ctx
                    .signer
                    .local_key(raw.chain_id)?
                    .ok_or_else(|| RouterError::Wallet("no local key".into()))?
                    .try_into()
                    .map_err(|_| RouterError::Wallet("ed25519 seed must be 32 bytes".into()))?;
                SigningKey::from_bytes(&seed).sign(&digest).to_bytes()
            }
        };

        let verifying_key = VerifyingKey::from_bytes(&tx.public_key.data)
            .map_err(|_| RouterError::WrongRawTx("invalid ed25519 public key".into()))?;
        if verifying_key
            .verify(&digest, &ed25519_dalek::Signature::from_bytes(&signature))
            .is_err()
        {
            warn!(chain_id = raw.chain_id, from = %raw.from, "Signature does not verify");
            return Err(RouterError::SignatureMismatch);
        }

        let signed = SignedTransaction {
            transaction: tx,
            signature: Signature {
                key_type: ED25519,
                data: signature,
            },
        };
        let payload = borsh::to_vec(&signed)
            .map_err(|e| RouterError::Internal(format!("encode signed near transaction: {}", e)))?;
        let tx_hash = bs58::encode(digest).into_string();
        info!(chain_id = raw.chain_id, tx_hash = %tx_hash, nonce = raw.sequence, "Signed transaction");
        Ok((
            SignedTx {
                chain_id: raw.chain_id,
                tx_hash: tx_hash.clone(),
                payload: payload.into(),
            },
            tx_hash,
        ))
    }

    async fn send_transaction(&self, signed: &SignedTx) -> RouterResult<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&signed.payload);
        let result: TransactionResult = self
            .rpc
            .call("broadcast_tx_commit", json!([encoded]))
            .await?;
        if result.transaction.hash != signed.tx_hash {
            warn!(chain_id = signed.chain_id, expected = %signed.tx_hash, returned = %result.transaction.hash, "Node returned a different transaction hash");
        }
        if result.status.is_failure() {
            warn!(chain_id = signed.chain_id, tx_hash = %result.transaction.hash, "Broadcast transaction failed on chain");
        }
        Ok(result.transaction.hash)
    }

    async fn ledger_sequence(&self, account: &str) -> RouterResult<u64> {
        let (key_text, _) = self.public_key()?;
        let view: AccessKeyView = self
            .rpc
            .call(
                "query",
                json!({
                    "request_type": "view_access_key",
                    "finality": "final",
                    "account_id": account,
                    "public_key": key_text,
                }),
            )
            .await?;
        // The ledger expects a nonce above the access key's last one
        Ok(view.nonce + 1)
    }

    fn verify_msg_hash(&self, raw: &RawTx, msg_hashes: &[String]) -> RouterResult<()> {
        Self::decode_payload(raw)?;
        let expected = format!("0x{}", hex::encode(sha256(&raw.payload)));
        match msg_hashes {
            [hash] if eq_address(hash, &expected) && eq_address(hash, &raw.msg_hash_hex()) => Ok(()),
            _ => Err(RouterError::MsgHashMismatch),
        }
    }
}
