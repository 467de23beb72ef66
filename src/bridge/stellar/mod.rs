//! Stellar chain bridge
//!
//! Swaps are payments into the router's deposit account. The payment's
//! transaction memo carries the destination: `[addr_len, chain_len, addr,
//! chain]`. Destination transactions are single-payment transactions from the
//! quorum account, hashed over the network passphrase.
//!
//! Amounts are fixed-point decimals with seven fractional digits.

pub mod strkey;
pub mod types;

use self::strkey::decode_account;
use self::types::{
    AccountView, Asset, DecoratedSignature, Envelope, LatestLedger, Operation, Payment,
    SendResult, Transaction, TransactionView,
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
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use ethers::types::U256;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

const AMOUNT_DECIMALS: usize = 7;
const DEFAULT_BASE_FEE: u64 = 100;
/// Envelope type tag of a transaction in the signature base
const ENVELOPE_TYPE_TX: [u8; 4] = [0, 0, 0, 2];

/// Decimal amount to stroops
pub fn parse_amount(amount: &str) -> RouterResult<U256> {
    let wrong = || RouterError::ParseData(format!("invalid amount {}", amount));
    let (int, frac) = amount.split_once('.').unwrap_or((amount, ""));
    let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if int.is_empty() || frac.len() > AMOUNT_DECIMALS || !digits_only(int) || !digits_only(frac) {
        return Err(wrong());
    }
    U256::from_dec_str(&format!("{}{:0<width$}", int, frac, width = AMOUNT_DECIMALS))
        .map_err(|_| wrong())
}

/// Stroops to a decimal amount with all seven fractional digits
pub fn format_amount(value: U256) -> String {
    let unit = U256::exp10(AMOUNT_DECIMALS);
    format!(
        "{}.{:0width$}",
        value / unit,
        (value % unit).as_u64(),
        width = AMOUNT_DECIMALS
    )
}

/// Bind address and destination chain id from a binary memo
pub fn parse_memo(memo: &str) -> RouterResult<(String, u64)> {
    let bytes = STANDARD
        .decode(memo)
        .map_err(|e| RouterError::ParseData(format!("memo is not base64: {}", e)))?;
    if bytes.len() < 2 {
        return Err(RouterError::ParseData("memo too short".into()));
    }
    let (addr_len, chain_len) = (bytes[0] as usize, bytes[1] as usize);
    if chain_len == 0 || chain_len > 8 || bytes.len() != 2 + addr_len + chain_len {
        return Err(RouterError::ParseData(format!(
            "memo length {} does not match header ({}, {})",
            bytes.len(),
            addr_len,
            chain_len
        )));
    }
    let (addr, chain) = bytes[2..].split_at(addr_len);
    // 20-byte binds are EVM addresses; anything else is the address text
    let bind = if addr.len() == 20 {
        format!("0x{}", hex::encode(addr))
    } else {
        String::from_utf8(addr.to_vec())
            .map_err(|_| RouterError::WrongBindAddress(hex::encode(addr)))?
    };
    let to_chain_id = chain.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
    Ok((bind, to_chain_id))
}

/// `sha256(sha256(passphrase) ‖ ENVELOPE_TYPE_TX ‖ tx)`
pub fn transaction_hash(passphrase: &str, payload: &[u8]) -> [u8; 32] {
    let network_id = Sha256::digest(passphrase.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(network_id);
    hasher.update(ENVELOPE_TYPE_TX);
    hasher.update(payload);
    hasher.finalize().into()
}

pub struct StellarBridge {
    config: ChainConfig,
    ctx: BridgeContext,
    rpc: RpcClient,
    passphrase: String,
}

impl StellarBridge {
    pub fn new(config: ChainConfig, ctx: BridgeContext) -> RouterResult<Self> {
        let passphrase = config.network_passphrase.clone().ok_or_else(|| {
            RouterError::Config(format!("chain {} has no network passphrase", config.chain_id))
        })?;
        let rpc = ctx.rpc_client(&config)?;
        Ok(Self {
            config,
            ctx,
            rpc,
            passphrase,
        })
    }

    pub fn create(config: ChainConfig, ctx: BridgeContext) -> RouterResult<Arc<dyn Bridge>> {
        Ok(Arc::new(Self::new(config, ctx)?))
    }

    async fn get_transaction_view(&self, tx_hash: &str) -> RouterResult<TransactionView> {
        let view: TransactionView = self
            .rpc
            .call("getTransaction", json!({"hash": tx_hash}))
            .await?;
        match view.status.as_str() {
            "SUCCESS" => Ok(view),
            "FAILED" => Err(RouterError::TxWithWrongStatus),
            _ => Err(RouterError::TxNotFound {
                tx_hash: tx_hash.to_string(),
            }),
        }
    }

    async fn status_of(&self, view: &TransactionView) -> RouterResult<TxStatus> {
        Ok(TxStatus::new(
            view.ledger,
            view.created_at,
            self.latest_height().await?,
        ))
    }

    fn payment_record(
        &self,
        tx_hash: &str,
        log_index: usize,
        status: &TxStatus,
        memo: Option<&str>,
        op: &Operation,
    ) -> Option<RouterResult<SwapRecord>> {
        let (from, to, asset, amount) = match op {
            Operation::Payment {
                from,
                to,
                asset,
                amount,
            } => (from, to, asset, amount),
            Operation::Other => return None,
        };
        let record = (|| -> RouterResult<SwapRecord> {
            let value = parse_amount(amount)?;
            if value.is_zero() {
                return Err(RouterError::TxWithWrongValue);
            }
            let memo = memo.ok_or_else(|| RouterError::ParseData("missing memo".into()))?;
            let (bind, to_chain_id) = parse_memo(memo)?;
            Ok(SwapRecord {
                swap_type: SwapType::SimpleTransfer,
                tx_hash: tx_hash.to_string(),
                log_index,
                from_chain_id: self.config.chain_id,
                to_chain_id,
                from: from.clone(),
                bind,
                token: asset.key(),
                token_id: String::new(),
                value,
                height: status.height,
                timestamp: status.timestamp,
                contract: to.clone(),
                tx_to: to.clone(),
                payload: SwapPayload::Transfer,
            })
        })();
        Some(record)
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

    /// The payment `args` calls for
    fn payment_for(&self, args: &BuildTxArgs) -> RouterResult<Payment> {
        let record = &args.record;
        if record.swap_type != SwapType::SimpleTransfer {
            return Err(RouterError::SwapTypeNotSupported);
        }
        if decode_account(&record.bind).is_none() {
            return Err(RouterError::WrongBindAddress(record.bind.clone()));
        }
        let (to_token, amount) = destination_amount(self.ctx.registry.as_ref(), record)?;
        let asset = Asset::from_key(&to_token.address).ok_or(RouterError::MissTokenConfig)?;
        Ok(Payment {
            destination: record.bind.clone(),
            asset,
            amount: format_amount(amount),
        })
    }

    fn fee(&self, operations: usize) -> u64 {
        self.config.base_fee.unwrap_or(DEFAULT_BASE_FEE) * operations as u64
    }

    fn decode_payload(raw: &RawTx) -> RouterResult<Transaction> {
        serde_json::from_slice(&raw.payload)
            .map_err(|e| RouterError::WrongRawTx(format!("undecodable stellar transaction: {}", e)))
    }

    fn account_key(account: &str) -> RouterResult<VerifyingKey> {
        decode_account(account)
            .and_then(|key| VerifyingKey::from_bytes(&key).ok())
            .ok_or_else(|| RouterError::WrongRawTx(format!("invalid source account {}", account)))
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
impl Bridge for StellarBridge {
    fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    fn is_valid_address(&self, address: &str) -> bool {
        decode_account(address).is_some()
    }

    async fn latest_height(&self) -> RouterResult<u64> {
        let ledger: LatestLedger = self.rpc.call("getLatestLedger", json!({})).await?;
        Ok(ledger.sequence)
    }

    async fn get_transaction(&self, tx_hash: &str) -> RouterResult<SourceTx> {
        let raw: serde_json::Value = self
            .rpc
            .call("getTransaction", json!({"hash": tx_hash}))
            .await?;
        let view: TransactionView = serde_json::from_value(raw.clone())
            .map_err(|e| RouterError::ParseData(format!("transaction {}: {}", tx_hash, e)))?;
        if view.status == "NOT_FOUND" {
            return Err(RouterError::TxNotFound {
                tx_hash: tx_hash.to_string(),
            });
        }
        let to = view
            .operations
            .iter()
            .find_map(|op| match op {
                Operation::Payment { to, .. } => Some(to.clone()),
                Operation::Other => None,
            })
            .unwrap_or_default();
        Ok(SourceTx {
            hash: view.hash,
            from: view.source_account,
            to,
            raw,
        })
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> RouterResult<TxStatus> {
        let view = self.get_transaction_view(tx_hash).await?;
        self.status_of(&view).await
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
        let view = self.get_transaction_view(tx_hash).await?;
        let status = self.status_of(&view).await?;

        let range = match log_index {
            Some(index) if index >= view.operations.len() => {
                return Err(RouterError::LogIndexOutOfRange)
            }
            Some(index) => index..index + 1,
            None => 0..view.operations.len(),
        };

        let memo = view.memo.as_deref();
        let logs = range
            .filter_map(|index| {
                let result =
                    self.payment_record(tx_hash, index, &status, memo, &view.operations[index])?;
                if let Err(e) = &result {
                    debug!(chain_id = self.config.chain_id, tx_hash, log_index = index, error = %e, "Payment rejected");
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
        let payment = self.payment_for(args)?;

        let sequence = self
            .ctx
            .sequencer
            .next(chain_id, &args.from, || self.ledger_sequence(&args.from))
            .await?;

        let destination = payment.destination.clone();
        let tx = Transaction {
            source_account: args.from.clone(),
            fee: self.fee(1),
            sequence,
            memo: args.record.tx_hash.clone(),
            operations: vec![payment],
        };
        let payload = match serde_json::to_vec(&tx) {
            Ok(payload) => payload,
            Err(e) => {
                self.ctx.sequencer.release(chain_id, &args.from, sequence).await;
                return Err(RouterError::Internal(format!("encode stellar transaction: {}", e)));
            }
        };

        info!(chain_id, tx_hash = %args.record.tx_hash, log_index = args.record.log_index, sequence, "Built raw transaction");
        Ok(RawTx {
            chain_id,
            from: args.from.clone(),
            to: destination,
            sequence,
            msg_hash: transaction_hash(&self.passphrase, &payload).to_vec().into(),
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
        let payment = self.payment_for(args)?;
        if tx.source_account != args.from {
            return Err(RouterError::WrongRawTx("source account mismatch".into()));
        }
        if raw.to != payment.destination || tx.operations != [payment] {
            return Err(RouterError::WrongRawTx("payment mismatch".into()));
        }
        if tx.memo != args.record.tx_hash {
            return Err(RouterError::WrongRawTx("memo mismatch".into()));
        }
        if tx.sequence != raw.sequence {
            return Err(RouterError::WrongRawTx("sequence mismatch".into()));
        }
        if tx.fee > self.fee(tx.operations.len()) {
            return Err(RouterError::WrongRawTx("fee above base fee".into()));
        }
        if transaction_hash(&self.passphrase, &raw.payload)[..] != raw.msg_hash[..] {
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
        let digest = transaction_hash(&self.passphrase, &raw.payload);
        if digest[..] != raw.msg_hash[..] {
            return Err(RouterError::MsgHashMismatch);
        }
        let verifying_key = Self::account_key(&tx.source_account)?;

        let signature = match &self.ctx.signer {
            SignerBackend::Mpc(coordinator) => {
                let pub_key = self
                    .config
                    .mpc_public_key
                    .clone()
                    .unwrap_or_else(|| hex::encode(verifying_key.as_bytes()));
                let rsv = coordinator.sign_raw(raw, args, &pub_key).await?;
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

        if verifying_key
            .verify(&digest, &ed25519_dalek::Signature::from_bytes(&signature))
            .is_err()
        {
            warn!(chain_id = raw.chain_id, from = %raw.from, "Signature does not verify");
            return Err(RouterError::SignatureMismatch);
        }

        let envelope = Envelope {
            tx,
            signatures: vec![DecoratedSignature {
                hint: hex::encode(&verifying_key.as_bytes()[28..]),
                signature: hex::encode(signature),
            }],
        };
        let payload = serde_json::to_vec(&envelope)
            .map_err(|e| RouterError::Internal(format!("encode stellar envelope: {}", e)))?;
        let tx_hash = hex::encode(digest);
        info!(chain_id = raw.chain_id, tx_hash = %tx_hash, sequence = raw.sequence, "Signed transaction");
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
        let result: SendResult = self
            .rpc
            .call(
                "sendTransaction",
                json!({"transaction": STANDARD.encode(&signed.payload)}),
            )
            .await?;
        match result.status.as_str() {
            "PENDING" | "DUPLICATE" => {}
            status => {
                return Err(RouterError::RpcQuery {
                    chain_id: signed.chain_id,
                    message: format!(
                        "sendTransaction returned {}: {}",
                        status,
                        result.error.unwrap_or_default()
                    ),
                })
            }
        }
        if !eq_address(&result.hash, &signed.tx_hash) {
            warn!(chain_id = signed.chain_id, expected = %signed.tx_hash, returned = %result.hash, "Node returned a different transaction hash");
        }
        Ok(result.hash)
    }

    async fn ledger_sequence(&self, account: &str) -> RouterResult<u64> {
        let view: AccountView = self
            .rpc
            .call("getAccount", json!({"address": account}))
            .await?;
        let current: u64 = view.sequence.parse().map_err(|_| {
            RouterError::ParseData(format!("invalid account sequence {}", view.sequence))
        })?;
        Ok(current + 1)
    }

    fn verify_msg_hash(&self, raw: &RawTx, msg_hashes: &[String]) -> RouterResult<()> {
        Self::decode_payload(raw)?;
        let expected = format!(
            "0x{}",
            hex::encode(transaction_hash(&self.passphrase, &raw.payload))
        );
        match msg_hashes {
            [hash] if eq_address(hash, &expected) && eq_address(hash, &raw.msg_hash_hex()) => Ok(()),
            _ => Err(RouterError::MsgHashMismatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::strkey::encode_account;
    use super::*;
    use crate::config::TokenChainConfig;
    use crate::mpc::coordinator::testing::FakeMpc;
    use crate::mpc::SigningCoordinator;
    use crate::registry::StaticRegistry;
    use crate::rpc::testing::FakeTransport;
    use crate::testing::*;
    use crate::tx::Sequencer;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::time::Duration;

    const STELLAR: u64 = 1_000_005_788_240;
    const PASSPHRASE: &str = "Test SDF Network ; September 2015";
    const SEED: [u8; 32] = [7u8; 32];
    const TX_HASH: &str = "3389e9f0f1a65f19736cacf544c2e825313e8447f569233bb8db39aa607c8889";

    fn router_account() -> String {
        encode_account(SigningKey::from_bytes(&SEED).verifying_key().as_bytes())
    }

    fn issuer() -> String {
        encode_account(&[1u8; 32])
    }

    fn stellar_chain() -> ChainConfig {
        ChainConfig {
            chain_id: STELLAR,
            name: "Stellar".into(),
            family: "stellar".into(),
            router_contract: router_account(),
            router_mpc: router_account(),
            confirmations: 1,
            initial_height: 0,
            network_passphrase: Some(PASSPHRASE.into()),
            base_fee: Some(100),
            ..chain(56)
        }
    }

    fn stellar_registry() -> Arc<StaticRegistry> {
        let mut settings = settings();
        settings.chains.insert("stellar".into(), stellar_chain());
        settings.tokens[0].chains.insert(
            STELLAR.to_string(),
            TokenChainConfig {
                address: format!("USDC:{}", issuer()),
                decimals: 7,
                router_contract: None,
                underlying: None,
                min_swap: None,
                max_swap: None,
            },
        );
        Arc::new(StaticRegistry::from_settings(&settings).unwrap())
    }

    fn bridge(transport: Arc<FakeTransport>, signer: SignerBackend) -> StellarBridge {
        let ctx = BridgeContext {
            transport,
            registry: stellar_registry(),
            sequencer: Arc::new(Sequencer::new()),
            signer,
            rpc_timeout: Duration::from_secs(1),
        };
        StellarBridge::new(stellar_chain(), ctx).unwrap()
    }

    fn local_keys() -> SignerBackend {
        let mut keys = HashMap::new();
        keys.insert(STELLAR, hex::encode(SEED));
        SignerBackend::LocalKeys(Arc::new(keys))
    }

    /// Memo binding an EVM address on BSC
    fn evm_memo() -> String {
        let mut memo = vec![20u8, 1];
        memo.extend([0x88u8; 20]);
        memo.push(56);
        STANDARD.encode(memo)
    }

    fn payment(amount: &str) -> Value {
        json!({
            "type": "payment",
            "from": encode_account(&[2u8; 32]),
            "to": router_account(),
            "asset": {"type": "credit", "code": "USDC", "issuer": issuer()},
            "amount": amount,
        })
    }

    fn source_transport(status: &str, operations: Vec<Value>) -> Arc<FakeTransport> {
        Arc::new(
            FakeTransport::new()
                .on(
                    "getTransaction",
                    json!({
                        "status": status,
                        "hash": TX_HASH,
                        "ledger": 1000,
                        "createdAt": 1_700_000_000u64,
                        "sourceAccount": encode_account(&[2u8; 32]),
                        "memo": evm_memo(),
                        "operations": operations,
                    }),
                )
                .on("getLatestLedger", json!({"sequence": 1010})),
        )
    }

    #[test]
    fn test_amounts() {
        assert_eq!(parse_amount("5").unwrap(), U256::from(50_000_000u64));
        assert_eq!(parse_amount("0.0000001").unwrap(), U256::one());
        assert_eq!(parse_amount("12.5").unwrap(), U256::from(125_000_000u64));
        assert!(parse_amount("1.00000001").is_err());
        assert!(parse_amount(".5").is_err());
        assert!(parse_amount("-1").is_err());
        assert_eq!(format_amount(U256::from(125_000_000u64)), "12.5000000");
        assert_eq!(format_amount(U256::one()), "0.0000001");
    }

    #[test]
    fn test_memo_forms() {
        assert_eq!(parse_memo(&evm_memo()).unwrap(), (BIND.to_string(), 56));

        let mut text = vec![8u8, 2];
        text.extend(b"bob.near");
        text.extend([0x03, 0xe9]);
        assert_eq!(
            parse_memo(&STANDARD.encode(text)).unwrap(),
            ("bob.near".to_string(), 1001)
        );

        assert!(matches!(
            parse_memo(&STANDARD.encode([20u8, 1, 0x88])),
            Err(RouterError::ParseData(_))
        ));
        assert!(parse_memo("not base64!").is_err());
    }

    #[tokio::test]
    async fn test_detect_payment() {
        let operations = vec![
            json!({"type": "create_account", "funder": issuer()}),
            payment("0.5"),
        ];
        let bridge = bridge(source_transport("SUCCESS", operations), local_keys());
        let detection = bridge
            .detect_swaps(TX_HASH, SwapType::SimpleTransfer, None)
            .await
            .unwrap();
        assert_eq!(detection.status, TxStatus::new(1000, 1_700_000_000, 1010));
        assert_eq!(detection.logs.len(), 1);

        let record = detection.logs[0].result.clone().unwrap();
        assert_eq!(record.log_index, 1);
        assert_eq!(record.from_chain_id, STELLAR);
        assert_eq!(record.to_chain_id, 56);
        assert_eq!(record.bind, BIND);
        assert_eq!(record.token, format!("USDC:{}", issuer()));
        assert_eq!(record.value, U256::from(5_000_000u64));
        assert_eq!(record.contract, router_account());
    }

    #[tokio::test]
    async fn test_detect_rejections() {
        let bridge = bridge(
            source_transport("SUCCESS", vec![payment("0"), payment("1.x")]),
            local_keys(),
        );
        let detection = bridge
            .detect_swaps(TX_HASH, SwapType::SimpleTransfer, None)
            .await
            .unwrap();
        assert_eq!(detection.logs[0].result, Err(RouterError::TxWithWrongValue));
        assert!(matches!(detection.logs[1].result, Err(RouterError::ParseData(_))));
        assert_eq!(
            bridge
                .detect_swaps(TX_HASH, SwapType::SimpleTransfer, Some(2))
                .await
                .err(),
            Some(RouterError::LogIndexOutOfRange)
        );

        let failed = bridge_with_status("FAILED");
        assert_eq!(
            failed.get_transaction_status(TX_HASH).await.err(),
            Some(RouterError::TxWithWrongStatus)
        );
        let missing = bridge_with_status("NOT_FOUND");
        assert!(missing.get_transaction_status(TX_HASH).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_infrastructure() {
        let transport = Arc::new(FakeTransport::new().on_fn("getTransaction", |_| {
            Err(crate::rpc::TransportError::Http("connection refused".into()))
        }));
        let err = bridge(transport, local_keys())
            .detect_swaps(TX_HASH, SwapType::SimpleTransfer, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::RpcQuery { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Infrastructure);
    }

    fn bridge_with_status(status: &str) -> StellarBridge {
        bridge(source_transport(status, vec![]), local_keys())
    }

    fn dest_transport() -> Arc<FakeTransport> {
        Arc::new(
            FakeTransport::new()
                .on("getAccount", json!({"id": router_account(), "sequence": "99"}))
                .on_fn("sendTransaction", |params| {
                    let bytes = STANDARD
                        .decode(params["transaction"].as_str().unwrap())
                        .unwrap();
                    let envelope: Envelope = serde_json::from_slice(&bytes).unwrap();
                    let tx = serde_json::to_vec(&envelope.tx).unwrap();
                    Ok(json!({
                        "status": "PENDING",
                        "hash": hex::encode(transaction_hash(PASSPHRASE, &tx)),
                    }))
                }),
        )
    }

    fn build_args() -> BuildTxArgs {
        BuildTxArgs {
            record: SwapRecord {
                to_chain_id: STELLAR,
                bind: encode_account(&[3u8; 32]),
                ..transfer_record()
            },
            from: router_account(),
            trade_deadline: None,
        }
    }

    #[tokio::test]
    async fn test_build_check_sign_send_with_local_key() {
        let transport = dest_transport();
        let bridge = bridge(transport.clone(), local_keys());
        let args = build_args();

        let raw = bridge.build_raw_transaction(&args).await.unwrap();
        assert_eq!(raw.sequence, 100);
        assert_eq!(raw.to, args.record.bind);
        let tx: Transaction = serde_json::from_slice(&raw.payload).unwrap();
        // 5 USDC at 6 decimals pays out 5.0000000
        assert_eq!(tx.operations[0].amount, "5.0000000");
        assert_eq!(tx.fee, 100);

        bridge.check_raw_transaction(&raw, &args).await.unwrap();
        bridge.verify_msg_hash(&raw, &[raw.msg_hash_hex()]).unwrap();

        let (signed, hash) = bridge.sign_transaction(&raw, &args).await.unwrap();
        assert_eq!(hash, hex::encode(&raw.msg_hash));
        assert_eq!(bridge.send_transaction(&signed).await.unwrap(), hash);
        assert_eq!(transport.calls("sendTransaction").len(), 1);
    }

    #[tokio::test]
    async fn test_build_rejections() {
        let bridge = bridge(dest_transport(), local_keys());

        let mut args = build_args();
        args.from = issuer();
        assert!(matches!(
            bridge.build_raw_transaction(&args).await,
            Err(RouterError::SenderMismatch { .. })
        ));

        let mut args = build_args();
        args.record.bind = BIND.into();
        assert_eq!(
            bridge.build_raw_transaction(&args).await.err(),
            Some(RouterError::WrongBindAddress(BIND.into()))
        );
    }

    #[tokio::test]
    async fn test_check_detects_tampering() {
        let bridge = bridge(dest_transport(), local_keys());
        let args = build_args();
        let raw = bridge.build_raw_transaction(&args).await.unwrap();

        let mut inflated = args.clone();
        inflated.record.value = U256::from(50_000_000u64);
        assert!(matches!(
            bridge.check_raw_transaction(&raw, &inflated).await,
            Err(RouterError::WrongRawTx(_))
        ));

        let mut forged = raw.clone();
        forged.msg_hash = vec![0u8; 32].into();
        assert_eq!(
            bridge.check_raw_transaction(&forged, &args).await.err(),
            Some(RouterError::MsgHashMismatch)
        );
    }

    #[tokio::test]
    async fn test_sign_with_quorum_signature() {
        let args = build_args();
        let raw = bridge(dest_transport(), local_keys())
            .build_raw_transaction(&args)
            .await
            .unwrap();

        let mut mpc = settings().mpc;
        mpc.sign_poll_interval_ms = 1;
        let quorum = |seed: [u8; 32]| {
            let sig = SigningKey::from_bytes(&seed).sign(&raw.msg_hash);
            let api = FakeMpc::signing(vec![hex::encode(sig.to_bytes())]);
            SignerBackend::Mpc(Arc::new(SigningCoordinator::new(Arc::new(api), &mpc)))
        };

        let (_, hash) = bridge(dest_transport(), quorum(SEED))
            .sign_transaction(&raw, &args)
            .await
            .unwrap();
        assert_eq!(hash, hex::encode(&raw.msg_hash));
        assert_eq!(
            bridge(dest_transport(), quorum([9u8; 32]))
                .sign_transaction(&raw, &args)
                .await
                .err(),
            Some(RouterError::SignatureMismatch)
        );
    }

    #[tokio::test]
    async fn test_send_error_status() {
        let transport = Arc::new(FakeTransport::new().on(
            "sendTransaction",
            json!({"status": "ERROR", "hash": "ab", "errorResultXdr": "AAAA"}),
        ));
        let bridge = bridge(transport, local_keys());
        let signed = SignedTx {
            chain_id: STELLAR,
            tx_hash: "ab".into(),
            payload: vec![1u8].into(),
        };
        assert!(matches!(
            bridge.send_transaction(&signed).await,
            Err(RouterError::RpcQuery { .. })
        ));
    }

    #[test]
    fn test_requires_passphrase() {
        let ctx = BridgeContext {
            transport: Arc::new(FakeTransport::new()),
            registry: stellar_registry(),
            sequencer: Arc::new(Sequencer::new()),
            signer: local_keys(),
            rpc_timeout: Duration::from_secs(1),
        };
        let config = ChainConfig {
            network_passphrase: None,
            ..stellar_chain()
        };
        assert!(matches!(
            StellarBridge::new(config, ctx),
            Err(RouterError::Config(_))
        ));
        assert!(bridge(dest_transport(), local_keys()).is_valid_address(&issuer()));
    }
}
