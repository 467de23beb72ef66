//! Registration and verification entry points
//!
//! The router ties a source bridge's decoders to the consistency validator:
//! - `register_swap` reports every candidate of a transaction, accepting
//!   unconfirmed data so a swap can be queued early
//! - `verify_transaction` checks one candidate in full before it is signed

use super::{BuildTxArgs, RegisterArgs, RegisteredSwap, SwapRecord, VerifyArgs};
use crate::bridge::{Bridge, BridgeRegistry};
use crate::error::{RouterError, RouterResult};
use crate::metrics;
use crate::registry::TokenRegistry;
use crate::tx::Sequencer;
use crate::validate::ConsistencyValidator;

use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SwapRouter {
    bridges: Arc<BridgeRegistry>,
    registry: Arc<dyn TokenRegistry>,
    validator: ConsistencyValidator,
    sequencer: Arc<Sequencer>,
    trade_deadline_secs: u64,
}

impl SwapRouter {
    pub fn new(
        bridges: Arc<BridgeRegistry>,
        registry: Arc<dyn TokenRegistry>,
        sequencer: Arc<Sequencer>,
        trade_deadline_secs: u64,
    ) -> Self {
        Self {
            validator: ConsistencyValidator::new(registry.clone(), bridges.clone()),
            bridges,
            registry,
            sequencer,
            trade_deadline_secs,
        }
    }

    pub fn bridge(&self, chain_id: u64) -> RouterResult<Arc<dyn Bridge>> {
        self.bridges.get(chain_id)
    }

    pub fn bridges(&self) -> &BridgeRegistry {
        &self.bridges
    }

    pub fn registry(&self) -> &Arc<dyn TokenRegistry> {
        &self.registry
    }

    pub fn sequencer(&self) -> &Arc<Sequencer> {
        &self.sequencer
    }

    /// Fill the symbolic token id from the source token address
    fn normalize(&self, mut record: SwapRecord) -> SwapRecord {
        if record.token_id.is_empty() && !record.token.is_empty() {
            if let Some(token_id) = self
                .registry
                .token_id_by_address(record.from_chain_id, &record.token)
            {
                record.token_id = token_id;
            }
        }
        record
    }

    /// Decode and validate every candidate of a source transaction
    pub async fn register_swap(
        &self,
        chain_id: u64,
        tx_hash: &str,
        args: RegisterArgs,
    ) -> RouterResult<Vec<RegisteredSwap>> {
        let source = self.bridge(chain_id)?;
        let detection = source
            .detect_swaps(tx_hash, args.swap_type, args.log_index)
            .await?;

        if detection.logs.is_empty() {
            debug!(chain_id, tx_hash, "No swap log found");
            return Ok(vec![RegisteredSwap::failed(
                args.log_index.unwrap_or_default(),
                &RouterError::SwapoutLogNotFound,
            )]);
        }

        let mut registered = Vec::with_capacity(detection.logs.len());
        for detected in detection.logs {
            let result = match detected.result {
                Ok(record) => {
                    let record = self.normalize(record);
                    self.validator
                        .validate(source.as_ref(), &record, &detection.status, true)
                        .await
                        .map(|_| record)
                }
                Err(e) => Err(e),
            };
            match &result {
                Ok(record) => {
                    info!(chain_id, tx_hash, log_index = detected.log_index, to_chain_id = record.to_chain_id, "Swap registered");
                    metrics::record_swap_registered(chain_id);
                }
                Err(e) => {
                    warn!(chain_id, tx_hash, log_index = detected.log_index, error = %e, "Swap registration rejected");
                    metrics::record_swap_rejected(chain_id, e.kind());
                }
            }
            registered.push(RegisteredSwap::from_result(detected.log_index, result));
        }
        Ok(registered)
    }

    /// Decode and fully validate one candidate
    pub async fn verify_transaction(
        &self,
        chain_id: u64,
        tx_hash: &str,
        args: VerifyArgs,
    ) -> RouterResult<SwapRecord> {
        let source = self.bridge(chain_id)?;
        let detection = source
            .detect_swaps(tx_hash, args.swap_type, Some(args.log_index))
            .await?;
        let detected = detection
            .logs
            .into_iter()
            .next()
            .ok_or(RouterError::SwapoutLogNotFound)?;

        let record = self.normalize(detected.result?);
        self.validator
            .validate(source.as_ref(), &record, &detection.status, args.allow_unstable)
            .await?;
        debug!(chain_id, tx_hash, log_index = args.log_index, "Swap verified");
        Ok(record)
    }

    /// Re-read `account`'s next sequence from its ledger and align the
    /// local counter. Returns the broadcast transactions still outstanding.
    pub async fn sync_sequence(&self, chain_id: u64, account: &str) -> RouterResult<usize> {
        let on_chain_next = self.bridge(chain_id)?.ledger_sequence(account).await?;
        let pending = self.sequencer.sync(chain_id, account, on_chain_next).await;
        debug!(chain_id, account, on_chain_next, pending, "Sequence synced");
        Ok(pending)
    }

    /// Sync every sender that has allocated a sequence
    pub async fn sync_sequences(&self) {
        for (chain_id, account) in self.sequencer.tracked() {
            if let Err(e) = self.sync_sequence(chain_id, &account).await {
                warn!(chain_id, account = %account, error = %e, "Sequence sync failed");
            }
        }
    }

    /// Build input for the destination chain of a verified record
    pub fn build_args(&self, record: SwapRecord) -> RouterResult<BuildTxArgs> {
        let from = self
            .registry
            .router_mpc(record.to_chain_id)
            .ok_or(RouterError::MissRouterInfo)?;
        let trade_deadline = record
            .swap_type
            .is_trade()
            .then(|| chrono::Utc::now().timestamp() as u64 + self.trade_deadline_secs);
        Ok(BuildTxArgs {
            record,
            from,
            trade_deadline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::swap::{DetectedLog, SwapType};
    use crate::testing::*;

    fn router() -> (SwapRouter, Arc<crate::bridge::testing::FakeBridge>) {
        let (bridges, source, _) = fake_bridges();
        (
            SwapRouter::new(bridges, registry(), Arc::new(Sequencer::new()), 600),
            source,
        )
    }

    #[tokio::test]
    async fn test_register_reports_each_candidate() {
        let (router, source) = router();
        let good = SwapRecord {
            token_id: String::new(),
            ..transfer_record()
        };
        {
            let mut state = source.state.lock().unwrap();
            state.status = Some(crate::swap::TxStatus::new(1000, 0, 1001));
            state.records.push(DetectedLog {
                log_index: 1,
                result: Ok(good),
            });
            state.records.push(DetectedLog {
                log_index: 2,
                result: Err(RouterError::TxWithWrongTopics),
            });
        }

        let results = router
            .register_swap(
                1,
                &transfer_record().tx_hash,
                RegisterArgs {
                    swap_type: SwapType::SimpleTransfer,
                    log_index: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        // Token id resolved from the source token address; unstable data allowed
        assert_eq!(results[0].record.as_ref().unwrap().token_id, "USDC");
        assert_eq!(results[1].error_kind, Some(ErrorKind::Malformed));
    }

    #[tokio::test]
    async fn test_register_nothing_matched() {
        let (router, source) = router();
        source.state.lock().unwrap().status = Some(crate::swap::TxStatus::new(1000, 0, 1001));
        let results = router
            .register_swap(
                1,
                "0x01",
                RegisterArgs {
                    swap_type: SwapType::SimpleTransfer,
                    log_index: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error_kind, Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_verify_requires_stability() {
        let (router, source) = router();
        let record = transfer_record();
        {
            let mut state = source.state.lock().unwrap();
            state.status = Some(crate::swap::TxStatus::new(1000, 0, 1005));
            state.records.push(DetectedLog {
                log_index: 1,
                result: Ok(record.clone()),
            });
        }
        let args = VerifyArgs {
            swap_type: SwapType::SimpleTransfer,
            log_index: 1,
            allow_unstable: false,
        };
        assert_eq!(
            router.verify_transaction(1, &record.tx_hash, args).await,
            Err(RouterError::TxNotStable)
        );

        source.state.lock().unwrap().status = Some(crate::swap::TxStatus::new(1000, 0, 1012));
        let verified = router.verify_transaction(1, &record.tx_hash, args).await.unwrap();
        assert_eq!(verified, record);
    }

    #[tokio::test]
    async fn test_verify_wrong_swap_type_is_not_found() {
        let (router, source) = router();
        let record = transfer_record();
        {
            let mut state = source.state.lock().unwrap();
            state.status = Some(crate::swap::TxStatus::new(1000, 0, 2000));
            state.records.push(DetectedLog {
                log_index: 1,
                result: Ok(record.clone()),
            });
        }
        let args = VerifyArgs {
            swap_type: SwapType::TradeForToken,
            log_index: 1,
            allow_unstable: false,
        };
        assert_eq!(
            router.verify_transaction(1, &record.tx_hash, args).await,
            Err(RouterError::SwapoutLogNotFound)
        );
    }

    #[tokio::test]
    async fn test_sync_sequences_follows_ledger() {
        let (bridges, _, dest) = fake_bridges();
        let sequencer = Arc::new(Sequencer::new());
        let router = SwapRouter::new(bridges, registry(), sequencer.clone(), 600);
        let from = "0x4444444444444444444444444444444444444444";

        for _ in 0..3 {
            let sequence = sequencer.next(56, from, || async { Ok(4) }).await.unwrap();
            sequencer.mark_pending(56, from, sequence, "0xsent").await;
        }
        // Unknown chain only logs
        sequencer.next(99, "0x01", || async { Ok(0) }).await.unwrap();

        dest.state.lock().unwrap().ledger_sequence = 6;
        router.sync_sequences().await;
        assert_eq!(router.sync_sequence(56, from).await, Ok(1));

        dest.state.lock().unwrap().ledger_sequence = 9;
        router.sync_sequences().await;
        assert_eq!(sequencer.next(56, from, || async { Ok(0) }).await.unwrap(), 9);
    }

    #[test]
    fn test_build_args() {
        let (router, _) = router();
        let args = router.build_args(transfer_record()).unwrap();
        assert_eq!(args.from, "0x4444444444444444444444444444444444444444");
        assert!(args.trade_deadline.is_none());

        let trade = router
            .build_args(trade_record(&[BSC_USDC, BSC_WNATIVE], true))
            .unwrap();
        assert!(trade.trade_deadline.is_some());
    }
}
