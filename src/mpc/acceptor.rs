//! Co-signer side of threshold signing
//!
//! Every node of the quorum periodically lists the sign requests waiting for
//! its answer, re-verifies the source swap independently and rebuilds the
//! expected destination transaction before answering AGREE or DISAGREE.
//! Requests that hit a transient error are left unanswered and retried on
//! the next round. Once this node agrees to a digest for a swap it refuses
//! any other digest for the same swap.

use super::client::MpcApi;
use super::types::{AcceptRequest, SignContext, SignInfoData, AGREE, DISAGREE};
use crate::cache::BoundedCache;
use crate::config::MpcConfig;
use crate::error::{RouterError, RouterResult};
use crate::metrics;
use crate::swap::{eq_address, SwapKey, SwapRouter, VerifyArgs};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const HANDLED_CACHE_SIZE: usize = 10_000;

#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Agree,
    Disagree(RouterError),
    Retry(RouterError),
}

impl Verdict {
    fn from_error(e: RouterError) -> Self {
        if e.is_retryable() {
            Verdict::Retry(e)
        } else {
            Verdict::Disagree(e)
        }
    }
}

pub struct SignAcceptor {
    api: Arc<dyn MpcApi>,
    router: Arc<SwapRouter>,
    interval: Duration,
    expired_secs: i64,
    handled: BoundedCache<String, bool>,
    /// Digests agreed per swap; never evicted
    agreed: DashMap<SwapKey, Vec<String>>,
}

fn normalized_hashes(msg_hash: &[String]) -> Vec<String> {
    msg_hash
        .iter()
        .map(|h| h.trim_start_matches("0x").to_lowercase())
        .collect()
}

impl SignAcceptor {
    pub fn new(api: Arc<dyn MpcApi>, router: Arc<SwapRouter>, config: &MpcConfig) -> Self {
        Self {
            api,
            router,
            interval: Duration::from_secs(config.accept_interval_secs.max(1)),
            expired_secs: config.sign_info_expired_secs,
            handled: BoundedCache::new(HANDLED_CACHE_SIZE),
            agreed: DashMap::new(),
        }
    }

    /// Poll pending requests until shutdown is signalled
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "Sign acceptor started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.process_pending().await {
                        warn!(error = %e, "Get pending sign requests failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Sign acceptor stopping");
                    return;
                }
            }
        }
    }

    /// One round over the pending requests; returns how many were answered
    pub async fn process_pending(&self) -> RouterResult<usize> {
        let infos = self.api.get_cur_node_sign_info(self.expired_secs).await?;
        let mut answered = 0;
        for info in infos {
            if self.handled.contains(&info.key) {
                continue;
            }
            let (swap_key, verdict) = self.review(&info).await;
            let accept = match verdict {
                Verdict::Agree => AGREE,
                Verdict::Disagree(e) => {
                    warn!(key = %info.key, error = %e, "Disagree sign request");
                    DISAGREE
                }
                Verdict::Retry(e) => {
                    debug!(key = %info.key, error = %e, "Sign request review postponed");
                    continue;
                }
            };

            let request = AcceptRequest {
                key: info.key.clone(),
                accept: accept.to_string(),
                msg_hash: info.msg_hash.clone(),
                msg_context: info.msg_context.clone(),
                time_stamp: chrono::Utc::now().timestamp_millis().to_string(),
            };
            match self.api.accept_sign(&request).await {
                Ok(_) => {
                    info!(key = %info.key, accept, "Sign request answered");
                    metrics::record_sign_verdict(accept);
                    self.handled.insert(info.key.clone(), true);
                    if let (AGREE, Some(swap_key)) = (accept, swap_key) {
                        self.agreed
                            .entry(swap_key)
                            .or_insert_with(|| normalized_hashes(&info.msg_hash));
                    }
                    answered += 1;
                }
                Err(e) => warn!(key = %info.key, error = %e, "Accept sign failed"),
            }
        }
        Ok(answered)
    }

    /// Verdict on one request, with the swap it claims to authorize
    async fn review(&self, info: &SignInfoData) -> (Option<SwapKey>, Verdict) {
        let decoded = info
            .msg_context
            .first()
            .map(|c| serde_json::from_str::<SignContext>(c));
        let context = match decoded {
            Some(Ok(context)) => context,
            Some(Err(e)) => {
                let e = RouterError::WrongRawTx(format!("undecodable context: {}", e));
                return (None, Verdict::Disagree(e));
            }
            None => {
                let e = RouterError::WrongRawTx("missing context".into());
                return (None, Verdict::Disagree(e));
            }
        };
        let record = &context.args.record;
        let swap_key = SwapKey::new(record.from_chain_id, &record.tx_hash, record.log_index);
        let verdict = match self.check(info, &swap_key, &context).await {
            Ok(()) => Verdict::Agree,
            Err(e) => Verdict::from_error(e),
        };
        (Some(swap_key), verdict)
    }

    async fn check(
        &self,
        info: &SignInfoData,
        swap_key: &SwapKey,
        context: &SignContext,
    ) -> RouterResult<()> {
        if let Some(agreed) = self.agreed.get(swap_key) {
            if *agreed != normalized_hashes(&info.msg_hash) {
                return Err(RouterError::DuplicateSwap {
                    key: swap_key.to_string(),
                });
            }
        }

        let claimed = &context.args.record;
        let verified = self
            .router
            .verify_transaction(
                claimed.from_chain_id,
                &claimed.tx_hash,
                VerifyArgs {
                    swap_type: claimed.swap_type,
                    log_index: claimed.log_index,
                    allow_unstable: false,
                },
            )
            .await?;
        if &verified != claimed {
            return Err(RouterError::WrongRawTx("swap record mismatch".into()));
        }

        let mpc = self
            .router
            .registry()
            .router_mpc(claimed.to_chain_id)
            .ok_or(RouterError::MissRouterInfo)?;
        if !eq_address(&context.args.from, &mpc) {
            return Err(RouterError::SenderMismatch {
                have: context.args.from.clone(),
                want: mpc,
            });
        }

        let dest = self.router.bridge(claimed.to_chain_id)?;
        dest.verify_msg_hash(&context.raw, &info.msg_hash)?;
        dest.check_raw_transaction(&context.raw, &context.args).await
    }
}
