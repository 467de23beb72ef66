//! Gateway views and the payment transaction envelope

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct LatestLedger {
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Asset {
    Native,
    Credit { code: String, issuer: String },
}

impl Asset {
    /// Registry key of the asset: `native` or `CODE:ISSUER`
    pub fn key(&self) -> String {
        match self {
            Asset::Native => "native".to_string(),
            Asset::Credit { code, issuer } => format!("{}:{}", code, issuer),
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        if key.eq_ignore_ascii_case("native") {
            return Some(Asset::Native);
        }
        let (code, issuer) = key.split_once(':')?;
        if code.is_empty() || code.len() > 12 || issuer.is_empty() {
            return None;
        }
        Some(Asset::Credit {
            code: code.to_string(),
            issuer: issuer.to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Payment {
        from: String,
        to: String,
        asset: Asset,
        /// Decimal with up to seven fractional digits
        amount: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    /// `SUCCESS`, `FAILED` or `NOT_FOUND`
    pub status: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub ledger: u64,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub source_account: String,
    /// Base64 of the binary memo
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountView {
    /// Decimal string
    pub sequence: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendResult {
    /// `PENDING`, `DUPLICATE`, `TRY_AGAIN_LATER` or `ERROR`
    pub status: String,
    pub hash: String,
    #[serde(default, rename = "errorResultXdr")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub destination: String,
    pub asset: Asset,
    pub amount: String,
}

/// Unsigned payment transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub source_account: String,
    pub fee: u64,
    pub sequence: u64,
    /// Source swap hash
    pub memo: String,
    pub operations: Vec<Payment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoratedSignature {
    /// Last four bytes of the signing key
    pub hint: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub tx: Transaction,
    pub signatures: Vec<DecoratedSignature>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_keys() {
        let usdc = Asset::from_key("USDC:GISSUER").unwrap();
        assert_eq!(usdc.key(), "USDC:GISSUER");
        assert_eq!(Asset::from_key("NATIVE"), Some(Asset::Native));
        assert_eq!(Asset::from_key("USDC"), None);
        assert_eq!(Asset::from_key("TOOLONGASSETCODE:G"), None);
    }

    #[test]
    fn test_unknown_operation() {
        let op: Operation =
            serde_json::from_str(r#"{"type": "create_account", "funder": "G"}"#).unwrap();
        assert!(matches!(op, Operation::Other));
    }
}
