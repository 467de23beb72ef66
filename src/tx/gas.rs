//! Gas pricing for EVM destination transactions

use crate::config::GasPriceStrategy;
use crate::error::RouterResult;
use crate::rpc::RpcClient;

use ethers::types::{Block, H256, U256};
use serde_json::json;
use tracing::debug;

const GWEI: u64 = 1_000_000_000;

/// Gas price types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// Gas estimator for transactions
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
    max_gas_price_gwei: u64,
}

impl GasEstimator {
    /// Create a new gas estimator
    pub fn new(max_gas_price_gwei: u64) -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
            max_gas_price_gwei,
        }
    }

    /// Gas limit with buffer
    pub fn gas_limit(&self, base_gas: u64) -> U256 {
        let base_gas = U256::from(base_gas);
        base_gas + base_gas * self.gas_limit_buffer_percent / 100
    }

    /// Query the current price according to the chain strategy
    pub async fn gas_price(
        &self,
        rpc: &RpcClient,
        strategy: GasPriceStrategy,
    ) -> RouterResult<GasPrice> {
        let price = match strategy {
            GasPriceStrategy::Legacy => {
                let price: U256 = rpc.call("eth_gasPrice", json!([])).await?;
                GasPrice::Legacy(price)
            }
            GasPriceStrategy::Eip1559 => {
                let block: Option<Block<H256>> = rpc
                    .call_optional("eth_getBlockByNumber", json!(["latest", false]))
                    .await?;
                let base_fee = block.and_then(|b| b.base_fee_per_gas).unwrap_or_default();
                let priority_fee = rpc
                    .call::<U256>("eth_maxPriorityFeePerGas", json!([]))
                    .await
                    .unwrap_or_else(|_| U256::from(2 * GWEI));
                GasPrice::Eip1559 {
                    // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
                    max_fee_per_gas: base_fee * 2 + priority_fee,
                    max_priority_fee_per_gas: priority_fee,
                }
            }
        };

        let buffered = self.apply_buffer(price);
        debug!(chain_id = rpc.chain_id(), ?buffered, "Gas price");
        Ok(buffered)
    }

    /// Highest price a transaction may carry
    pub fn max_price(&self) -> U256 {
        U256::from(self.max_gas_price_gwei) * U256::from(GWEI)
    }

    /// Add the price buffer and cap at the configured maximum
    pub fn apply_buffer(&self, price: GasPrice) -> GasPrice {
        let cap = self.max_price();
        let buffer = |p: U256| std::cmp::min(p + p * self.gas_price_buffer_percent / 100, cap);
        match price {
            GasPrice::Legacy(price) => GasPrice::Legacy(buffer(price)),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: buffer(max_fee_per_gas),
                max_priority_fee_per_gas: buffer(max_priority_fee_per_gas),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::testing::FakeTransport;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_gas_limit_buffer() {
        let estimator = GasEstimator::new(500);
        assert_eq!(estimator.gas_limit(100_000), U256::from(120_000));
    }

    #[test]
    fn test_price_buffer_and_cap() {
        let estimator = GasEstimator::new(10);
        assert_eq!(
            estimator.apply_buffer(GasPrice::Legacy(U256::from(GWEI))),
            GasPrice::Legacy(U256::from(1_100_000_000u64))
        );
        assert_eq!(
            estimator.apply_buffer(GasPrice::Legacy(U256::from(50 * GWEI))),
            GasPrice::Legacy(U256::from(10 * GWEI))
        );
    }

    #[tokio::test]
    async fn test_eip1559_price() {
        let transport = FakeTransport::new()
            .on(
                "eth_getBlockByNumber",
                json!({
                    "number": "0x10",
                    "hash": format!("0x{}", "11".repeat(32)),
                    "parentHash": format!("0x{}", "00".repeat(32)),
                    "timestamp": "0x5",
                    "baseFeePerGas": "0x3b9aca00",
                    "transactions": []
                }),
            )
            .on("eth_maxPriorityFeePerGas", json!("0x3b9aca00"));
        let rpc = RpcClient::new(
            1,
            vec!["http://node".into()],
            Arc::new(transport),
            Duration::from_secs(1),
        )
        .unwrap();

        let price = GasEstimator::new(500)
            .gas_price(&rpc, GasPriceStrategy::Eip1559)
            .await
            .unwrap();
        assert_eq!(
            price,
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(3_300_000_000u64),
                max_priority_fee_per_gas: U256::from(1_100_000_000u64),
            }
        );
    }
}
