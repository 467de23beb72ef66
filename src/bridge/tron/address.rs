//! Account ids: base58check `T…` strings over a `0x41` version byte and the
//! 20-byte EVM address

use crate::error::{RouterError, RouterResult};

/// Version byte of mainnet account ids
pub const ADDRESS_VERSION: u8 = 0x41;

fn wrong(address: &str) -> RouterError {
    RouterError::ParseData(format!("invalid tron address {}", address))
}

/// 20 address bytes from hex, with or without `0x` or the version byte
fn hex_body(address: &str) -> Option<Vec<u8>> {
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);
    let bytes = hex::decode(digits).ok()?;
    match bytes.len() {
        20 => Some(bytes),
        21 if bytes[0] == ADDRESS_VERSION => Some(bytes[1..].to_vec()),
        _ => None,
    }
}

fn base58_body(address: &str) -> Option<Vec<u8>> {
    let raw = bs58::decode(address)
        .with_check(Some(ADDRESS_VERSION))
        .into_vec()
        .ok()?;
    (raw.len() == 21).then(|| raw[1..].to_vec())
}

/// Lowercase `0x` hex of an address given in either form
pub fn to_hex(address: &str) -> RouterResult<String> {
    let address = address.trim();
    let body = base58_body(address)
        .or_else(|| hex_body(address))
        .ok_or_else(|| wrong(address))?;
    Ok(format!("0x{}", hex::encode(body)))
}

/// Base58check id of an address given in either form
pub fn to_base58(address: &str) -> RouterResult<String> {
    let hex_address = to_hex(address)?;
    let mut raw = Vec::with_capacity(21);
    raw.push(ADDRESS_VERSION);
    raw.extend(hex_body(&hex_address).ok_or_else(|| wrong(address))?);
    Ok(bs58::encode(raw).with_check().into_string())
}

pub fn is_valid_address(address: &str) -> bool {
    to_hex(address).is_ok()
}
