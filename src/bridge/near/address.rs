//! NEAR account ids and ed25519 public keys

use crate::error::{RouterError, RouterResult};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NAMED_ACCOUNT: Regex =
        Regex::new(r"^(([a-z\d]+[-_])*[a-z\d]+\.)*([a-z\d]+[-_])*[a-z\d]+$").unwrap();
    static ref IMPLICIT_ACCOUNT: Regex = Regex::new(r"^[0-9a-f]{64}$").unwrap();
}

const KEY_PREFIX: &str = "ed25519:";

/// Named account (2 to 64 chars) or 64-hex implicit account
pub fn is_valid_account_id(account: &str) -> bool {
    if IMPLICIT_ACCOUNT.is_match(account) {
        return true;
    }
    (2..=64).contains(&account.len()) && NAMED_ACCOUNT.is_match(account)
}

/// Public key as `ed25519:<base58>` or 64 hex digits
pub fn parse_public_key(key: &str) -> RouterResult<[u8; 32]> {
    let body = key.strip_prefix(KEY_PREFIX).unwrap_or(key);
    let bytes = if body.len() == 64 && body.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(body).map_err(|e| RouterError::Config(format!("public key {}: {}", key, e)))?
    } else {
        bs58::decode(body)
            .into_vec()
            .map_err(|e| RouterError::Config(format!("public key {}: {}", key, e)))?
    };
    bytes
        .try_into()
        .map_err(|_| RouterError::Config(format!("public key {} is not 32 bytes", key)))
}

pub fn format_public_key(key: &[u8; 32]) -> String {
    format!("{}{}", KEY_PREFIX, bs58::encode(key).into_string())
}
