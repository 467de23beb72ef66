//! EVM address syntax

use crate::error::{RouterError, RouterResult};

use ethers::types::Address;
use ethers::utils::to_checksum;

/// `0x` followed by 40 hex digits; mixed case must be the EIP-55 checksum
/// when `check_mixed_case` is set
pub fn is_valid_address(address: &str, check_mixed_case: bool) -> bool {
    let digits = match address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) {
        Some(digits) => digits,
        None => return false,
    };
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    if !check_mixed_case {
        return true;
    }
    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    if !(has_lower && has_upper) {
        return true;
    }
    match address.parse::<Address>() {
        Ok(parsed) => to_checksum(&parsed, None) == address,
        Err(_) => false,
    }
}

pub fn parse_address(address: &str) -> RouterResult<Address> {
    if !is_valid_address(address, false) {
        return Err(RouterError::WrongBindAddress(address.to_string()));
    }
    address
        .parse()
        .map_err(|_| RouterError::WrongBindAddress(address.to_string()))
}
