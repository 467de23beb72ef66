//! Shared fixtures for unit tests

use crate::bridge::testing::FakeBridge;
use crate::bridge::BridgeRegistry;
use crate::config::{tests::SAMPLE, ChainConfig, Settings};
use crate::registry::StaticRegistry;
use crate::swap::{SwapPayload, SwapRecord, SwapType};

use ethers::types::U256;
use std::sync::Arc;

pub const ETH_ROUTER: &str = "0x1111111111111111111111111111111111111111";
pub const ETH_USDC: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const BSC_USDC: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const BSC_UNDERLYING: &str = "0xcccccccccccccccccccccccccccccccccccccccc";
pub const BSC_WNATIVE: &str = "0x5555555555555555555555555555555555555555";
pub const BIND: &str = "0x8888888888888888888888888888888888888888";

pub fn settings() -> Settings {
    Settings::from_toml_str(SAMPLE).unwrap()
}

pub fn registry() -> Arc<StaticRegistry> {
    Arc::new(StaticRegistry::from_settings(&settings()).unwrap())
}

pub fn chain(chain_id: u64) -> ChainConfig {
    settings().get_chain_by_id(chain_id).unwrap().clone()
}

/// 5 USDC from Ethereum to BSC, emitted by the Ethereum router
pub fn transfer_record() -> SwapRecord {
    SwapRecord {
        swap_type: SwapType::SimpleTransfer,
        tx_hash: format!("0x{}", "ab".repeat(32)),
        log_index: 1,
        from_chain_id: 1,
        to_chain_id: 56,
        from: "0x9999999999999999999999999999999999999999".to_string(),
        bind: BIND.to_string(),
        token: ETH_USDC.to_string(),
        token_id: "USDC".to_string(),
        value: U256::from(5_000_000u64),
        height: 1000,
        timestamp: 1_700_000_000,
        contract: ETH_ROUTER.to_string(),
        tx_to: ETH_ROUTER.to_string(),
        payload: SwapPayload::Transfer,
    }
}

pub fn trade_record(path: &[&str], for_native: bool) -> SwapRecord {
    SwapRecord {
        swap_type: if for_native {
            SwapType::TradeForNative
        } else {
            SwapType::TradeForToken
        },
        payload: SwapPayload::Trade {
            path: path.iter().map(|p| p.to_string()).collect(),
            amount_out_min: U256::from(1u64),
            for_native,
        },
        ..transfer_record()
    }
}

/// Bridge registry with fake Ethereum (source) and BSC (destination) bridges
pub fn fake_bridges() -> (Arc<BridgeRegistry>, Arc<FakeBridge>, Arc<FakeBridge>) {
    let bridges = Arc::new(BridgeRegistry::new());
    let source = Arc::new(FakeBridge::new(chain(1)));
    let dest = Arc::new(FakeBridge::new(chain(56)));
    bridges.insert(source.clone());
    bridges.insert(dest.clone());
    (bridges, source, dest)
}
