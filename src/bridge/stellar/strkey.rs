//! Account strkeys (`G…` ids) through the `stellar-strkey` codec

use stellar_strkey::ed25519::PublicKey;

/// Ed25519 key of a `G…` account id, `None` when the id is malformed
pub fn decode_account(account: &str) -> Option<[u8; 32]> {
    PublicKey::from_string(account).ok().map(|key| key.0)
}

pub fn encode_account(key: &[u8; 32]) -> String {
    PublicKey(*key).to_string()
}
