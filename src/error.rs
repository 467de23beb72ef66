//! Error types for the swap router
//!
//! Every failure carries a [`ErrorKind`] so callers can tell a swap that is
//! merely not ready yet apart from one that must never be processed.

use serde::Serialize;
use thiserror::Error;

/// Coarse classification of router errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transaction or log absent; may appear later
    NotFound,
    /// Confirmation threshold not met yet
    Unstable,
    /// Data cannot be decoded
    Malformed,
    /// Decoded data violates a consistency rule
    PolicyRejected,
    /// The signer quorum refused, failed or timed out
    SigningRejected,
    /// RPC or MPC endpoint unreachable
    Infrastructure,
    /// Local invariant or configuration problem
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unstable => "unstable",
            ErrorKind::Malformed => "malformed",
            ErrorKind::PolicyRejected => "policy_rejected",
            ErrorKind::SigningRejected => "signing_rejected",
            ErrorKind::Infrastructure => "infrastructure",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Main error type for the router
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC query failed on chain {chain_id}: {message}")]
    RpcQuery { chain_id: u64, message: String },

    #[error("MPC request failed: {0}")]
    Mpc(String),

    #[error("MPC {subject} returned status {status}: {error}")]
    MpcWrongStatus {
        subject: String,
        status: String,
        error: String,
    },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Transaction {tx_hash} not found")]
    TxNotFound { tx_hash: String },

    #[error("Swapout log not found")]
    SwapoutLogNotFound,

    #[error("Transaction is not stable yet")]
    TxNotStable,

    #[error("Transaction at height {height} is before initial height {initial}")]
    TxBeforeInitialHeight { height: u64, initial: u64 },

    #[error("Log index out of range")]
    LogIndexOutOfRange,

    #[error("Transaction log has wrong topics")]
    TxWithWrongTopics,

    #[error("Parse data error: {0}")]
    ParseData(String),

    #[error("Wrong raw transaction: {0}")]
    WrongRawTx(String),

    #[error("Transaction log was removed")]
    TxWithRemovedLog,

    #[error("Transaction has failed status")]
    TxWithWrongStatus,

    #[error("Transaction with wrong contract")]
    TxWithWrongContract,

    #[error("Transaction with wrong sender")]
    TxWithWrongSender,

    #[error("From chain id mismatch: have {have}, want {want}")]
    FromChainIdMismatch { have: u64, want: u64 },

    #[error("To chain id mismatch: have {have}, want {want}")]
    ToChainIdMismatch { have: u64, want: u64 },

    #[error("Missing token config")]
    MissTokenConfig,

    #[error("Missing router info")]
    MissRouterInfo,

    #[error("No bridge for chain id {chain_id}")]
    NoBridgeForChainId { chain_id: u64 },

    #[error("No underlying token")]
    NoUnderlyingToken,

    #[error("Transaction with wrong value")]
    TxWithWrongValue,

    #[error("Wrong bind address {0}")]
    WrongBindAddress(String),

    #[error("Transaction with wrong path")]
    TxWithWrongPath,

    #[error("Swap trade not supported")]
    SwapTradeNotSupported,

    #[error("Swap type not supported")]
    SwapTypeNotSupported,

    #[error("Sender mismatch: have {have}, want {want}")]
    SenderMismatch { have: String, want: String },

    #[error("Chain {chain_id} is a source only ledger")]
    NotADestination { chain_id: u64 },

    #[error("Missing MPC public key")]
    MissMpcPublicKey,

    #[error("Message hash mismatch")]
    MsgHashMismatch,

    #[error("Swap {key} is already in flight or signed")]
    DuplicateSwap { key: String },

    #[error("Signature does not match the expected signer")]
    SignatureMismatch,

    #[error("Sign status is failed")]
    SignStatusFailed,

    #[error("Sign status has disagree")]
    SignStatusHasDisagree,

    #[error("Sign status is timeout")]
    SignStatusTimeout,

    #[error("Sign deadline exceeded for {key}")]
    SignDeadlineExceeded { key: String },

    #[error("Wrong sign status {status}: {error}")]
    SignStatusWrong { status: String, error: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        use RouterError::*;
        match self {
            TxNotFound { .. } | SwapoutLogNotFound => ErrorKind::NotFound,
            TxNotStable => ErrorKind::Unstable,
            LogIndexOutOfRange | TxWithWrongTopics | ParseData(_) | WrongRawTx(_) => {
                ErrorKind::Malformed
            }
            TxBeforeInitialHeight { .. }
            | TxWithRemovedLog
            | TxWithWrongStatus
            | TxWithWrongContract
            | TxWithWrongSender
            | FromChainIdMismatch { .. }
            | ToChainIdMismatch { .. }
            | MissTokenConfig
            | MissRouterInfo
            | NoBridgeForChainId { .. }
            | NoUnderlyingToken
            | TxWithWrongValue
            | WrongBindAddress(_)
            | TxWithWrongPath
            | SwapTradeNotSupported
            | SwapTypeNotSupported
            | SenderMismatch { .. }
            | NotADestination { .. }
            | MissMpcPublicKey
            | MsgHashMismatch
            | DuplicateSwap { .. } => ErrorKind::PolicyRejected,
            SignatureMismatch
            | SignStatusFailed
            | SignStatusHasDisagree
            | SignStatusTimeout
            | SignDeadlineExceeded { .. }
            | SignStatusWrong { .. } => ErrorKind::SigningRejected,
            RpcQuery { .. } | Mpc(_) | MpcWrongStatus { .. } | Timeout { .. } => {
                ErrorKind::Infrastructure
            }
            Config(_) | InvalidStateTransition { .. } | Wallet(_) | Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if the same request may succeed when retried later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound | ErrorKind::Unstable | ErrorKind::Infrastructure
        )
    }

    /// Signing ran out of time; a fresh build may be attempted
    pub fn is_sign_timeout(&self) -> bool {
        matches!(
            self,
            RouterError::SignStatusTimeout | RouterError::SignDeadlineExceeded { .. }
        )
    }
}

/// Result type for router operations
pub type RouterResult<T> = Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            RouterError::TxNotFound {
                tx_hash: "0x1".into()
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(RouterError::TxNotStable.kind(), ErrorKind::Unstable);
        assert_eq!(RouterError::TxWithWrongTopics.kind(), ErrorKind::Malformed);
        assert_eq!(RouterError::TxWithWrongPath.kind(), ErrorKind::PolicyRejected);
        assert_eq!(
            RouterError::SignStatusHasDisagree.kind(),
            ErrorKind::SigningRejected
        );
        assert_eq!(
            RouterError::RpcQuery {
                chain_id: 1,
                message: "down".into()
            }
            .kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn test_retryable() {
        assert!(RouterError::TxNotStable.is_retryable());
        assert!(RouterError::SwapoutLogNotFound.is_retryable());
        assert!(RouterError::Mpc("connection refused".into()).is_retryable());
        assert!(!RouterError::TxWithWrongValue.is_retryable());
        assert!(!RouterError::SignStatusHasDisagree.is_retryable());
        assert!(!RouterError::SignStatusTimeout.is_retryable());
        assert!(RouterError::SignStatusTimeout.is_sign_timeout());
        assert!(!RouterError::SignStatusFailed.is_sign_timeout());
    }
}
