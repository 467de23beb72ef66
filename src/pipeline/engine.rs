//! Swap processing engine
//!
//! Jobs arrive on a bounded queue and run on a semaphore-limited worker pool.
//! Each job goes through verification, build, signing and broadcast in order;
//! transient failures are re-queued after a delay, permanent ones fail the
//! swap.

use super::guard::SwapGuard;
use crate::config::RouterConfig;
use crate::error::{RouterError, RouterResult};
use crate::metrics;
use crate::swap::{SwapKey, SwapRouter, SwapType, VerifyArgs};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One swap candidate to drive to broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapJob {
    pub id: Uuid,
    pub chain_id: u64,
    pub tx_hash: String,
    pub swap_type: SwapType,
    pub log_index: usize,
    #[serde(default)]
    pub attempts: u32,
}

impl SwapJob {
    pub fn new(chain_id: u64, tx_hash: &str, swap_type: SwapType, log_index: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_id,
            tx_hash: tx_hash.to_string(),
            swap_type,
            log_index,
            attempts: 0,
        }
    }

    pub fn key(&self) -> SwapKey {
        SwapKey::new(self.chain_id, &self.tx_hash, self.log_index)
    }
}

/// How a job reached the destination chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Sent { tx_hash: String },
    /// Signed on an earlier attempt; the stored transaction was sent again
    Rebroadcast { tx_hash: String },
}

pub struct SwapProcessor {
    router: Arc<SwapRouter>,
    guard: Arc<SwapGuard>,
    semaphore: Arc<Semaphore>,
    sender: mpsc::Sender<SwapJob>,
    receiver: Mutex<Option<mpsc::Receiver<SwapJob>>>,
    max_retries: u32,
    retry_delay: Duration,
    swap_deadline: Duration,
}

impl SwapProcessor {
    pub fn new(router: Arc<SwapRouter>, config: &RouterConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        Self {
            router,
            guard: Arc::new(SwapGuard::new()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_swaps.max(1))),
            sender,
            receiver: Mutex::new(Some(receiver)),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            swap_deadline: Duration::from_secs(config.swap_deadline_secs),
        }
    }

    pub fn guard(&self) -> &Arc<SwapGuard> {
        &self.guard
    }

    /// Queue a job without waiting
    pub fn submit(&self, job: SwapJob) -> RouterResult<()> {
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => {
                RouterError::Internal(format!("swap queue is full, dropped job {}", job.id))
            }
            mpsc::error::TrySendError::Closed(_) => {
                RouterError::Internal("swap queue is closed".into())
            }
        })
    }

    /// Number of free worker slots
    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Dispatch queued jobs until shutdown is signalled
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Some(mut receiver) = self.receiver.lock().await.take() else {
            warn!("Swap processor is already running");
            return;
        };
        info!(workers = self.semaphore.available_permits(), "Swap processor started");

        loop {
            tokio::select! {
                job = receiver.recv() => {
                    let Some(job) = job else { break };
                    let permit = match self.semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let processor = self.clone();
                    tokio::spawn(async move {
                        processor.handle(job).await;
                        drop(permit);
                    });
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Swap processor stopped");
    }

    /// Run one job and decide whether it goes back on the queue
    async fn handle(&self, job: SwapJob) {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.swap_deadline, self.process(&job)).await {
            Ok(result) => result,
            Err(_) => Err(RouterError::Timeout {
                operation: format!("swap {}", job.key()),
            }),
        };

        match result {
            Ok(outcome) => {
                metrics::record_swap_latency(job.chain_id, started.elapsed().as_secs_f64());
                info!(job_id = %job.id, chain_id = job.chain_id, tx_hash = %job.tx_hash, log_index = job.log_index, ?outcome, "Swap done");
            }
            Err(RouterError::DuplicateSwap { key }) => {
                debug!(job_id = %job.id, key = %key, "Swap already in flight, job dropped");
            }
            Err(e) if (e.is_retryable() || e.is_sign_timeout()) && job.attempts < self.max_retries => {
                debug!(job_id = %job.id, chain_id = job.chain_id, tx_hash = %job.tx_hash, log_index = job.log_index, attempts = job.attempts, error = %e, "Swap not ready, re-queueing");
                self.requeue(job);
            }
            Err(e) => {
                error!(job_id = %job.id, chain_id = job.chain_id, tx_hash = %job.tx_hash, log_index = job.log_index, attempts = job.attempts, error = %e, "Swap failed");
                metrics::record_swap_rejected(job.chain_id, e.kind());
            }
        }
    }

    fn requeue(&self, mut job: SwapJob) {
        job.attempts += 1;
        let sender = self.sender.clone();
        let delay = self.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = sender.send(job).await {
                warn!(job_id = %e.0.id, "Swap queue closed, retry dropped");
            }
        });
    }

    /// A failed send may leave the local sequence ahead of or behind the
    /// ledger; re-read it so the next allocation is usable
    async fn resync(&self, chain_id: u64, from: &str) {
        if let Err(e) = self.router.sync_sequence(chain_id, from).await {
            warn!(chain_id, from, error = %e, "Sequence resync after failed send failed");
        }
    }

    /// Verify, build, sign and send one swap
    pub async fn process(&self, job: &SwapJob) -> RouterResult<JobOutcome> {
        let key = job.key();
        let _in_flight = self.guard.acquire(key.clone())?;

        if let Some(signed) = self.guard.signed(&key) {
            let dest = self.router.bridge(signed.chain_id)?;
            let tx_hash = dest.send_transaction(&signed).await?;
            info!(key = %key, to_chain_id = signed.chain_id, tx_hash = %tx_hash, "Rebroadcast signed swap");
            return Ok(JobOutcome::Rebroadcast { tx_hash });
        }

        let record = self
            .router
            .verify_transaction(
                job.chain_id,
                &job.tx_hash,
                VerifyArgs {
                    swap_type: job.swap_type,
                    log_index: job.log_index,
                    allow_unstable: false,
                },
            )
            .await?;
        let args = self.router.build_args(record)?;
        let dest = self.router.bridge(args.record.to_chain_id)?;
        let sequencer = self.router.sequencer();

        let raw = dest.build_raw_transaction(&args).await?;
        let signed = match dest.check_raw_transaction(&raw, &args).await {
            Ok(()) => dest.sign_transaction(&raw, &args).await,
            Err(e) => Err(e),
        };
        let signed = match signed {
            Ok((signed, _)) => signed,
            Err(e) => {
                sequencer.release(raw.chain_id, &raw.from, raw.sequence).await;
                return Err(e);
            }
        };
        self.guard.record_signed(key.clone(), signed.clone());

        let tx_hash = match dest.send_transaction(&signed).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                metrics::record_tx_send_failed(raw.chain_id);
                self.resync(raw.chain_id, &raw.from).await;
                return Err(e);
            }
        };
        sequencer
            .mark_pending(raw.chain_id, &raw.from, raw.sequence, &tx_hash)
            .await;
        metrics::record_tx_sent(raw.chain_id);
        info!(key = %key, to_chain_id = raw.chain_id, sequence = raw.sequence, tx_hash = %tx_hash, "Swap transaction sent");
        Ok(JobOutcome::Sent { tx_hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::FakeBridge;
    use crate::swap::TxStatus;
    use crate::testing::*;
    use crate::tx::Sequencer;

    fn processor() -> (Arc<SwapProcessor>, Arc<FakeBridge>, Arc<FakeBridge>) {
        let (bridges, source, dest) = fake_bridges();
        let router = Arc::new(SwapRouter::new(
            bridges,
            registry(),
            Arc::new(Sequencer::new()),
            600,
        ));
        let processor = Arc::new(SwapProcessor::new(router, &settings().router));
        (processor, source, dest)
    }

    fn script_source(source: &FakeBridge, latest: u64) {
        let mut state = source.state.lock().unwrap();
        state.status = Some(TxStatus::new(1000, 0, latest));
        state.records = vec![crate::swap::DetectedLog {
            log_index: 1,
            result: Ok(transfer_record()),
        }];
    }

    fn job() -> SwapJob {
        let record = transfer_record();
        SwapJob::new(1, &record.tx_hash, SwapType::SimpleTransfer, record.log_index)
    }

    #[tokio::test]
    async fn test_process_sends_then_rebroadcasts() {
        let (processor, source, dest) = processor();
        script_source(&source, 1012);

        let first = processor.process(&job()).await.unwrap();
        assert_eq!(
            first,
            JobOutcome::Sent {
                tx_hash: "0xsigned0".into()
            }
        );

        // A second job for the same swap never builds or signs again
        let second = processor.process(&job()).await.unwrap();
        assert_eq!(
            second,
            JobOutcome::Rebroadcast {
                tx_hash: "0xsigned0".into()
            }
        );
        let state = dest.state.lock().unwrap();
        assert_eq!(state.built.len(), 1);
        assert_eq!(state.sent.len(), 2);
        assert!(!processor.guard().is_in_flight(&job().key()));
    }

    #[tokio::test]
    async fn test_old_swap_is_rebroadcast_after_heavy_traffic() {
        let (processor, source, dest) = processor();
        script_source(&source, 1012);
        processor.process(&job()).await.unwrap();

        // Many other swaps signed since then
        for n in 0..12_000usize {
            processor.guard().record_signed(
                SwapKey::new(1, &format!("0x{:064x}", n), 0),
                crate::swap::SignedTx {
                    chain_id: 56,
                    tx_hash: format!("0xother{}", n),
                    payload: vec![n as u8].into(),
                },
            );
        }

        assert_eq!(
            processor.process(&job()).await,
            Ok(JobOutcome::Rebroadcast {
                tx_hash: "0xsigned0".into()
            })
        );
        assert_eq!(dest.state.lock().unwrap().built.len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_swap_is_duplicate() {
        let (processor, source, dest) = processor();
        script_source(&source, 1012);

        let _held = processor.guard().acquire(job().key()).unwrap();
        assert!(matches!(
            processor.process(&job()).await,
            Err(RouterError::DuplicateSwap { .. })
        ));
        assert!(dest.state.lock().unwrap().built.is_empty());
    }

    #[tokio::test]
    async fn test_unstable_source_is_retryable() {
        let (processor, source, dest) = processor();
        script_source(&source, 1005);

        let err = processor.process(&job()).await.unwrap_err();
        assert_eq!(err, RouterError::TxNotStable);
        assert!(err.is_retryable());
        assert!(dest.state.lock().unwrap().built.is_empty());
    }

    #[tokio::test]
    async fn test_sign_rejection_is_not_recorded() {
        let (processor, source, dest) = processor();
        script_source(&source, 1012);
        dest.state.lock().unwrap().sign_error = Some(RouterError::SignStatusHasDisagree);

        assert_eq!(
            processor.process(&job()).await,
            Err(RouterError::SignStatusHasDisagree)
        );
        assert!(processor.guard().signed(&job().key()).is_none());
        assert!(dest.state.lock().unwrap().sent.is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_keeps_signed_tx() {
        let (processor, source, dest) = processor();
        script_source(&source, 1012);
        dest.state.lock().unwrap().fail_send = true;

        let err = processor.process(&job()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(processor.guard().signed(&job().key()).is_some());

        dest.state.lock().unwrap().fail_send = false;
        assert!(matches!(
            processor.process(&job()).await,
            Ok(JobOutcome::Rebroadcast { .. })
        ));
        assert_eq!(dest.state.lock().unwrap().built.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_resyncs_sequence() {
        let (processor, source, dest) = processor();
        script_source(&source, 1012);
        {
            let mut state = dest.state.lock().unwrap();
            state.fail_send = true;
            state.ledger_sequence = 17;
        }
        let from = "0x4444444444444444444444444444444444444444";

        processor.process(&job()).await.unwrap_err();

        let sequencer = processor.router.sequencer();
        assert!(sequencer.tracked().contains(&(56, from.to_string())));
        let next = sequencer.next(56, from, || async { Ok(0) }).await.unwrap();
        assert_eq!(next, 17);
    }

    #[tokio::test]
    async fn test_run_retries_until_stable() {
        let (processor, source, dest) = processor();
        script_source(&source, 1005);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = tokio::spawn(processor.clone().run(shutdown_rx));

        processor.submit(job()).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        script_source(&source, 1012);

        let sent = async {
            loop {
                if !dest.state.lock().unwrap().sent.is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), sent)
            .await
            .expect("swap was not retried to completion");

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
    }
}
