//! Per-chain bridge abstraction
//!
//! A [`Bridge`] knows how to read swap transactions from its ledger and how
//! to build, sign and broadcast the matching destination transaction. New
//! ledger families plug in through [`BridgeRegistry::register_family`].

pub mod evm;
pub mod near;
pub mod stellar;
pub mod tron;

use crate::config::ChainConfig;
use crate::error::{RouterError, RouterResult};
use crate::mpc::SigningCoordinator;
use crate::registry::TokenRegistry;
use crate::rpc::{RpcClient, RpcTransport};
use crate::swap::{BuildTxArgs, DetectedLog, RawTx, SignedTx, SourceTx, SwapType, TxStatus};
use crate::tx::Sequencer;

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Result of decoding one source transaction
#[derive(Debug, Clone)]
pub struct Detection {
    pub status: TxStatus,
    pub logs: Vec<DetectedLog>,
}

/// Operations every chain variant provides
#[async_trait]
pub trait Bridge: Send + Sync {
    fn chain_config(&self) -> &ChainConfig;

    fn chain_id(&self) -> u64 {
        self.chain_config().chain_id
    }

    /// Address syntax check for this ledger
    fn is_valid_address(&self, address: &str) -> bool;

    async fn latest_height(&self) -> RouterResult<u64>;

    async fn get_transaction(&self, tx_hash: &str) -> RouterResult<SourceTx>;

    async fn get_transaction_status(&self, tx_hash: &str) -> RouterResult<TxStatus>;

    /// Decode swap candidates of a source transaction. With `log_index`
    /// only that candidate is decoded; without it every candidate is scanned
    /// and those of another swap type are skipped.
    async fn detect_swaps(
        &self,
        tx_hash: &str,
        swap_type: SwapType,
        log_index: Option<usize>,
    ) -> RouterResult<Detection>;

    async fn build_raw_transaction(&self, args: &BuildTxArgs) -> RouterResult<RawTx>;

    /// Check that an unsigned transaction is exactly what `args` calls for
    async fn check_raw_transaction(&self, raw: &RawTx, args: &BuildTxArgs) -> RouterResult<()>;

    /// Sign through the configured backend; returns the signed transaction
    /// and its hash
    async fn sign_transaction(
        &self,
        raw: &RawTx,
        args: &BuildTxArgs,
    ) -> RouterResult<(SignedTx, String)>;

    async fn send_transaction(&self, signed: &SignedTx) -> RouterResult<String>;

    /// Next sequence number the ledger expects from `account`
    async fn ledger_sequence(&self, account: &str) -> RouterResult<u64>;

    /// Recompute the digest of `raw` and compare it with `msg_hashes`
    fn verify_msg_hash(&self, raw: &RawTx, msg_hashes: &[String]) -> RouterResult<()>;

    /// Liquidity pair of two tokens on a factory, `None` when absent
    async fn get_pair_for(
        &self,
        _factory: &str,
        _token0: &str,
        _token1: &str,
    ) -> RouterResult<Option<String>> {
        Err(RouterError::SwapTradeNotSupported)
    }

    /// Implementation behind a minimal proxy
    async fn resolve_proxy_master(&self, _contract: &str) -> RouterResult<Option<String>> {
        Ok(None)
    }

    async fn contract_code_hash(&self, _contract: &str) -> RouterResult<Option<String>> {
        Ok(None)
    }
}

/// Where signatures come from
#[derive(Clone)]
pub enum SignerBackend {
    /// Threshold signer quorum
    Mpc(Arc<SigningCoordinator>),
    /// Hex secrets keyed by chain id; test mode only
    LocalKeys(Arc<HashMap<u64, String>>),
}

impl SignerBackend {
    pub fn local_key(&self, chain_id: u64) -> RouterResult<Option<Vec<u8>>> {
        match self {
            SignerBackend::Mpc(_) => Ok(None),
            SignerBackend::LocalKeys(keys) => {
                let key = keys.get(&chain_id).ok_or_else(|| {
                    RouterError::Wallet(format!("no private key for chain {}", chain_id))
                })?;
                hex::decode(key.trim_start_matches("0x"))
                    .map(Some)
                    .map_err(|e| RouterError::Wallet(format!("invalid private key: {}", e)))
            }
        }
    }
}

/// Collaborators shared by every bridge
#[derive(Clone)]
pub struct BridgeContext {
    pub transport: Arc<dyn RpcTransport>,
    pub registry: Arc<dyn TokenRegistry>,
    pub sequencer: Arc<Sequencer>,
    pub signer: SignerBackend,
    pub rpc_timeout: Duration,
}

impl BridgeContext {
    pub fn rpc_client(&self, chain: &ChainConfig) -> RouterResult<RpcClient> {
        RpcClient::new(
            chain.chain_id,
            chain.rpc_urls.clone(),
            self.transport.clone(),
            self.rpc_timeout,
        )
    }
}

/// Builds a bridge for one chain
pub type BridgeFactory = fn(ChainConfig, BridgeContext) -> RouterResult<Arc<dyn Bridge>>;

/// Bridges by chain id, created through per-family factories
pub struct BridgeRegistry {
    factories: HashMap<String, BridgeFactory>,
    bridges: DashMap<u64, Arc<dyn Bridge>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            bridges: DashMap::new(),
        }
    }

    /// Registry knowing the built-in families
    pub fn with_default_families() -> Self {
        let mut registry = Self::new();
        registry.register_family("evm", evm::EvmBridge::create);
        registry.register_family("near", near::NearBridge::create);
        registry.register_family("stellar", stellar::StellarBridge::create);
        registry.register_family("tron", tron::TronBridge::create);
        registry
    }

    pub fn register_family(&mut self, family: &str, factory: BridgeFactory) {
        self.factories.insert(family.to_lowercase(), factory);
    }

    /// Create and insert the bridge for a chain
    pub fn add_chain(&self, chain: ChainConfig, ctx: BridgeContext) -> RouterResult<()> {
        let factory = self
            .factories
            .get(&chain.family.to_lowercase())
            .ok_or_else(|| {
                RouterError::Config(format!(
                    "unknown bridge family {} for chain {}",
                    chain.family, chain.chain_id
                ))
            })?;
        let chain_id = chain.chain_id;
        let family = chain.family.clone();
        let bridge = factory(chain, ctx)?;
        self.insert(bridge);
        info!(chain_id, family = %family, "Bridge initialized");
        Ok(())
    }

    pub fn insert(&self, bridge: Arc<dyn Bridge>) {
        self.bridges.insert(bridge.chain_id(), bridge);
    }

    pub fn get(&self, chain_id: u64) -> RouterResult<Arc<dyn Bridge>> {
        self.bridges
            .get(&chain_id)
            .map(|b| b.value().clone())
            .ok_or(RouterError::NoBridgeForChainId { chain_id })
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.bridges.iter().map(|b| *b.key()).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for BridgeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory bridge for router, validator and pipeline tests

    use super::*;
    use crate::swap::{eq_address, SwapRecord};
    use ethers::types::Bytes;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeState {
        pub status: Option<TxStatus>,
        pub records: Vec<DetectedLog>,
        pub pairs: Vec<(String, String)>,
        pub proxies: HashMap<String, String>,
        pub code_hashes: HashMap<String, String>,
        pub built: Vec<BuildTxArgs>,
        pub sent: Vec<SignedTx>,
        pub fail_send: bool,
        pub sign_error: Option<RouterError>,
        pub ledger_sequence: u64,
    }

    /// Scripted bridge; addresses are valid when they start with `0x`
    pub struct FakeBridge {
        pub config: ChainConfig,
        pub state: Mutex<FakeState>,
    }

    impl FakeBridge {
        pub fn new(config: ChainConfig) -> Self {
            Self {
                config,
                state: Mutex::new(FakeState::default()),
            }
        }

        pub fn with_record(self, height: u64, latest: u64, record: SwapRecord) -> Self {
            {
                let mut state = self.state.lock().unwrap();
                state.status = Some(TxStatus::new(height, record.timestamp, latest));
                state.records.push(DetectedLog {
                    log_index: record.log_index,
                    result: Ok(record),
                });
            }
            self
        }

        pub fn with_pair(self, a: &str, b: &str) -> Self {
            self.state
                .lock()
                .unwrap()
                .pairs
                .push((a.to_lowercase(), b.to_lowercase()));
            self
        }
    }

    #[async_trait]
    impl Bridge for FakeBridge {
        fn chain_config(&self) -> &ChainConfig {
            &self.config
        }

        fn is_valid_address(&self, address: &str) -> bool {
            address.starts_with("0x") && address.len() > 2
        }

        async fn latest_height(&self) -> RouterResult<u64> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .status
                .map(|s| s.latest)
                .unwrap_or_default())
        }

        async fn get_transaction(&self, tx_hash: &str) -> RouterResult<SourceTx> {
            Err(RouterError::TxNotFound {
                tx_hash: tx_hash.to_string(),
            })
        }

        async fn get_transaction_status(&self, tx_hash: &str) -> RouterResult<TxStatus> {
            self.state
                .lock()
                .unwrap()
                .status
                .ok_or_else(|| RouterError::TxNotFound {
                    tx_hash: tx_hash.to_string(),
                })
        }

        async fn detect_swaps(
            &self,
            tx_hash: &str,
            swap_type: SwapType,
            log_index: Option<usize>,
        ) -> RouterResult<Detection> {
            let state = self.state.lock().unwrap();
            let status = state.status.ok_or_else(|| RouterError::TxNotFound {
                tx_hash: tx_hash.to_string(),
            })?;
            let logs = state
                .records
                .iter()
                .filter(|d| log_index.map_or(true, |i| i == d.log_index))
                .filter(|d| {
                    d.result
                        .as_ref()
                        .map_or(true, |r| r.swap_type == swap_type)
                })
                .cloned()
                .collect();
            Ok(Detection { status, logs })
        }

        async fn build_raw_transaction(&self, args: &BuildTxArgs) -> RouterResult<RawTx> {
            self.state.lock().unwrap().built.push(args.clone());
            Ok(RawTx {
                chain_id: self.config.chain_id,
                from: args.from.clone(),
                to: self.config.router_contract.clone(),
                sequence: 0,
                payload: Bytes::from(args.record.tx_hash.clone().into_bytes()),
                msg_hash: Bytes::from(vec![1u8; 32]),
                key_type: crate::swap::KeyType::Ec256k1,
            })
        }

        async fn check_raw_transaction(&self, raw: &RawTx, args: &BuildTxArgs) -> RouterResult<()> {
            if raw.payload.as_ref() == args.record.tx_hash.as_bytes() {
                Ok(())
            } else {
                Err(RouterError::WrongRawTx("payload mismatch".into()))
            }
        }

        async fn sign_transaction(
            &self,
            raw: &RawTx,
            _args: &BuildTxArgs,
        ) -> RouterResult<(SignedTx, String)> {
            if let Some(err) = self.state.lock().unwrap().sign_error.clone() {
                return Err(err);
            }
            let tx_hash = format!("0xsigned{}", raw.sequence);
            Ok((
                SignedTx {
                    chain_id: raw.chain_id,
                    tx_hash: tx_hash.clone(),
                    payload: raw.payload.clone(),
                },
                tx_hash,
            ))
        }

        async fn send_transaction(&self, signed: &SignedTx) -> RouterResult<String> {
            let mut state = self.state.lock().unwrap();
            if state.fail_send {
                return Err(RouterError::RpcQuery {
                    chain_id: self.config.chain_id,
                    message: "send failed".into(),
                });
            }
            state.sent.push(signed.clone());
            Ok(signed.tx_hash.clone())
        }

        async fn ledger_sequence(&self, _account: &str) -> RouterResult<u64> {
            Ok(self.state.lock().unwrap().ledger_sequence)
        }

        fn verify_msg_hash(&self, raw: &RawTx, msg_hashes: &[String]) -> RouterResult<()> {
            match msg_hashes.first() {
                Some(h) if eq_address(h, &raw.msg_hash_hex()) => Ok(()),
                _ => Err(RouterError::MsgHashMismatch),
            }
        }

        async fn get_pair_for(
            &self,
            _factory: &str,
            token0: &str,
            token1: &str,
        ) -> RouterResult<Option<String>> {
            let state = self.state.lock().unwrap();
            let (a, b) = (token0.to_lowercase(), token1.to_lowercase());
            let found = state
                .pairs
                .iter()
                .any(|(x, y)| (x == &a && y == &b) || (x == &b && y == &a));
            Ok(found.then(|| "0xpair".to_string()))
        }

        async fn resolve_proxy_master(&self, contract: &str) -> RouterResult<Option<String>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .proxies
                .get(&contract.to_lowercase())
                .cloned())
        }

        async fn contract_code_hash(&self, contract: &str) -> RouterResult<Option<String>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .code_hashes
                .get(&contract.to_lowercase())
                .cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{tests::SAMPLE, Settings};
    use crate::registry::StaticRegistry;
    use crate::rpc::testing::FakeTransport;

    fn context() -> BridgeContext {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        BridgeContext {
            transport: Arc::new(FakeTransport::new()),
            registry: Arc::new(StaticRegistry::from_settings(&settings).unwrap()),
            sequencer: Arc::new(Sequencer::new()),
            signer: SignerBackend::LocalKeys(Arc::new(HashMap::new())),
            rpc_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_factory_by_family() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let registry = BridgeRegistry::with_default_families();
        for chain in settings.chains.values() {
            registry.add_chain(chain.clone(), context()).unwrap();
        }
        assert_eq!(registry.chain_ids(), vec![1, 56]);
        assert_eq!(registry.get(56).unwrap().chain_id(), 56);
        assert_eq!(
            registry.get(250).err(),
            Some(RouterError::NoBridgeForChainId { chain_id: 250 })
        );
    }

    #[test]
    fn test_unknown_family_rejected() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let mut chain = settings.get_chain_by_id(1).unwrap().clone();
        chain.family = "cosmos".into();
        let err = BridgeRegistry::with_default_families()
            .add_chain(chain, context())
            .unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));
    }

    #[test]
    fn test_local_key_lookup() {
        let mut keys = HashMap::new();
        keys.insert(1u64, "0x0102".to_string());
        let signer = SignerBackend::LocalKeys(Arc::new(keys));
        assert_eq!(signer.local_key(1).unwrap(), Some(vec![1, 2]));
        assert!(signer.local_key(2).is_err());
    }
}
