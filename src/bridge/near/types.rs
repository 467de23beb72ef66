//! NEAR RPC views and the borsh layout of transactions

use borsh::{BorshDeserialize, BorshSerialize};
use serde::Deserialize;

/// Key type tag of ed25519 keys and signatures
pub const ED25519: u8 = 0;

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
    /// Nanoseconds since the unix epoch
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockView {
    pub header: BlockHeader,
}

/// `status` of a transaction or receipt outcome
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionStatus {
    #[serde(rename = "Failure", default)]
    pub failure: Option<serde_json::Value>,
}

impl ExecutionStatus {
    pub fn is_failure(&self) -> bool {
        self.failure.as_ref().map_or(false, |f| !f.is_null())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionView {
    pub hash: String,
    pub signer_id: String,
    pub receiver_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Outcome {
    #[serde(default)]
    pub logs: Vec<String>,
    pub executor_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutcomeWithId {
    #[serde(default)]
    pub block_hash: String,
    pub outcome: Outcome,
}

/// Result of the `tx` and `broadcast_tx_commit` methods
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionResult {
    #[serde(default)]
    pub status: ExecutionStatus,
    pub transaction: TransactionView,
    pub transaction_outcome: OutcomeWithId,
    #[serde(default)]
    pub receipts_outcome: Vec<OutcomeWithId>,
}

impl TransactionResult {
    /// Log lines emitted by receipts that `executor` ran, in execution order
    pub fn logs_of(&self, executor: &str) -> Vec<&str> {
        self.receipts_outcome
            .iter()
            .filter(|r| r.outcome.executor_id == executor)
            .flat_map(|r| r.outcome.logs.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessKeyView {
    pub nonce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PublicKey {
    pub key_type: u8,
    pub data: [u8; 32],
}

impl PublicKey {
    pub fn ed25519(data: [u8; 32]) -> Self {
        Self {
            key_type: ED25519,
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FunctionCallAction {
    pub method_name: String,
    pub args: Vec<u8>,
    pub gas: u64,
    pub deposit: u128,
}

/// Transaction actions; the variant order is the wire tag
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Action {
    CreateAccount,
    DeployContract { code: Vec<u8> },
    FunctionCall(FunctionCallAction),
    Transfer { deposit: u128 },
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub signer_id: String,
    pub public_key: PublicKey,
    pub nonce: u64,
    pub receiver_id: String,
    pub block_hash: [u8; 32],
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Signature {
    pub key_type: u8,
    pub data: [u8; 64],
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: Signature,
}
