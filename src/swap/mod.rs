//! Normalized swap records and the argument types passed between stages
//!
//! Every bridge variant turns its ledger specific source data into a
//! [`SwapRecord`]; everything downstream only sees this shape.

pub mod router;

pub use router::SwapRouter;

use crate::error::{ErrorKind, RouterError, RouterResult};

use ethers::types::{Bytes, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of cross-chain operation a source transaction requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapType {
    SimpleTransfer,
    TransferWithCall,
    TradeForToken,
    TradeForNative,
}

impl SwapType {
    pub fn name(&self) -> &'static str {
        match self {
            SwapType::SimpleTransfer => "simple_transfer",
            SwapType::TransferWithCall => "transfer_with_call",
            SwapType::TradeForToken => "trade_for_token",
            SwapType::TradeForNative => "trade_for_native",
        }
    }

    pub fn is_trade(&self) -> bool {
        matches!(self, SwapType::TradeForToken | SwapType::TradeForNative)
    }
}

/// Arbitrary-call parameters carried by a transfer-with-call record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyCallInfo {
    pub call_from: String,
    pub call_to: Vec<String>,
    pub call_data: Vec<Bytes>,
    pub callbacks: Vec<String>,
    pub call_nonces: Vec<U256>,
}

/// Variant specific part of a swap record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SwapPayload {
    /// Plain token transfer
    Transfer,
    /// Transfer followed by a call through a proxy on the destination
    CallProxy { call_proxy: String, call_data: Bytes },
    /// Arbitrary cross-chain call with no token movement
    AnyCall(AnyCallInfo),
    /// Transfer followed by a swap along `path` on the destination
    Trade {
        path: Vec<String>,
        amount_out_min: U256,
        for_native: bool,
    },
}

/// Chain-agnostic description of a detected swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_type: SwapType,
    pub tx_hash: String,
    pub log_index: usize,
    pub from_chain_id: u64,
    pub to_chain_id: u64,
    pub from: String,
    /// Receiving address on the destination chain
    pub bind: String,
    /// Source token address or asset key
    pub token: String,
    /// Symbolic token id; empty until resolved through the registry
    pub token_id: String,
    pub value: U256,
    pub height: u64,
    pub timestamp: u64,
    /// Contract (or account) that emitted the swap
    pub contract: String,
    /// Receiver of the outer transaction
    pub tx_to: String,
    pub payload: SwapPayload,
}

impl SwapRecord {
    pub fn key(&self) -> SwapKey {
        SwapKey::new(self.from_chain_id, &self.tx_hash, self.log_index)
    }

    pub fn is_any_call(&self) -> bool {
        matches!(self.payload, SwapPayload::AnyCall(_))
    }
}

/// Identity of a swap: source chain, source transaction and log position
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwapKey {
    pub chain_id: u64,
    pub tx_hash: String,
    pub log_index: usize,
}

impl SwapKey {
    pub fn new(chain_id: u64, tx_hash: &str, log_index: usize) -> Self {
        Self {
            chain_id,
            tx_hash: tx_hash.to_lowercase(),
            log_index,
        }
    }
}

impl fmt::Display for SwapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain_id, self.tx_hash, self.log_index)
    }
}

/// Inclusion and confirmation state of a source transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TxStatus {
    pub height: u64,
    pub timestamp: u64,
    pub confirmations: u64,
    pub latest: u64,
}

impl TxStatus {
    pub fn new(height: u64, timestamp: u64, latest: u64) -> Self {
        Self {
            height,
            timestamp,
            confirmations: latest.saturating_sub(height),
            latest,
        }
    }
}

/// Outer transaction fetched from a source chain
#[derive(Debug, Clone, Serialize)]
pub struct SourceTx {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub raw: serde_json::Value,
}

/// One candidate produced by a variant's decoder, before validation
#[derive(Debug, Clone)]
pub struct DetectedLog {
    pub log_index: usize,
    pub result: RouterResult<SwapRecord>,
}

/// Per-log outcome of a registration
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredSwap {
    pub log_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<SwapRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl RegisteredSwap {
    pub fn from_result(log_index: usize, result: RouterResult<SwapRecord>) -> Self {
        match result {
            Ok(record) => Self {
                log_index,
                record: Some(record),
                error: None,
                error_kind: None,
            },
            Err(e) => Self::failed(log_index, &e),
        }
    }

    pub fn failed(log_index: usize, err: &RouterError) -> Self {
        Self {
            log_index,
            record: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

/// Arguments of a registration request
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RegisterArgs {
    pub swap_type: SwapType,
    /// Scan every candidate when absent
    #[serde(default)]
    pub log_index: Option<usize>,
}

/// Arguments of a verification request
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VerifyArgs {
    pub swap_type: SwapType,
    pub log_index: usize,
    #[serde(default)]
    pub allow_unstable: bool,
}

/// Input of the destination build step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTxArgs {
    pub record: SwapRecord,
    /// Account that will sign on the destination chain
    pub from: String,
    /// Unix deadline for destination trades, fixed once per build
    #[serde(default)]
    pub trade_deadline: Option<u64>,
}

/// Signature scheme used by the quorum for a destination chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "EC256K1")]
    Ec256k1,
    #[serde(rename = "ED25519")]
    Ed25519,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ec256k1 => "EC256K1",
            KeyType::Ed25519 => "ED25519",
        }
    }
}

/// Unsigned destination transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTx {
    pub chain_id: u64,
    pub from: String,
    pub to: String,
    pub sequence: u64,
    /// Variant specific encoding of the unsigned transaction
    pub payload: Bytes,
    /// Digest the signer quorum signs
    pub msg_hash: Bytes,
    pub key_type: KeyType,
}

impl RawTx {
    pub fn msg_hash_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.msg_hash))
    }
}

/// Signed destination transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub chain_id: u64,
    pub tx_hash: String,
    pub payload: Bytes,
}

/// Case-insensitive address comparison
pub fn eq_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
