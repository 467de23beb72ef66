//! Amount rescaling between token precisions

use crate::error::{RouterError, RouterResult};
use crate::registry::{TokenDeployment, TokenRegistry};
use crate::swap::SwapRecord;

use ethers::types::U256;

/// Rescale `value` from `from_decimals` to `to_decimals`, rounding down.
/// `None` when the result does not fit in 256 bits.
pub fn convert_value(value: U256, from_decimals: u8, to_decimals: u8) -> Option<U256> {
    use std::cmp::Ordering;
    match from_decimals.cmp(&to_decimals) {
        Ordering::Equal => Some(value),
        Ordering::Less => value.checked_mul(U256::exp10((to_decimals - from_decimals) as usize)),
        Ordering::Greater => Some(value / U256::exp10((from_decimals - to_decimals) as usize)),
    }
}

/// Check bounds in source precision and return the destination amount
pub fn check_swap_value(
    value: U256,
    from: &TokenDeployment,
    to: &TokenDeployment,
) -> RouterResult<U256> {
    if from.min_swap.map_or(false, |min| value < min) {
        return Err(RouterError::TxWithWrongValue);
    }
    if from.max_swap.map_or(false, |max| value > max) {
        return Err(RouterError::TxWithWrongValue);
    }
    match convert_value(value, from.decimals, to.decimals) {
        Some(converted) if !converted.is_zero() => Ok(converted),
        _ => Err(RouterError::TxWithWrongValue),
    }
}

/// Destination token deployment and the amount a verified record pays out there
pub fn destination_amount(
    registry: &dyn TokenRegistry,
    record: &SwapRecord,
) -> RouterResult<(TokenDeployment, U256)> {
    let from = registry
        .token(&record.token_id, record.from_chain_id)
        .ok_or(RouterError::MissTokenConfig)?;
    let to = registry
        .token(&record.token_id, record.to_chain_id)
        .ok_or(RouterError::MissTokenConfig)?;
    let amount = check_swap_value(record.value, &from, &to)?;
    Ok((to, amount))
}
