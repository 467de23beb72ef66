//! Sequence number allocation for destination transactions
//!
//! Handles:
//! - One counter per (chain, sender), seeded from the ledger on first use
//! - Allocation serialized per sender, parallel across senders
//! - Release of an allocated number when the transaction never leaves
//! - Re-sync with the on-chain value

use crate::error::RouterResult;

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-sender state
#[derive(Default)]
struct SenderState {
    /// Next number to hand out, `None` until seeded
    next: Option<u64>,
    /// Broadcast transactions: sequence -> tx hash
    pending: BTreeMap<u64, String>,
}

struct Sender {
    /// Account as first seen, ledgers may be case sensitive
    account: String,
    state: Arc<Mutex<SenderState>>,
}

/// Allocates strictly increasing sequence numbers per (chain, sender)
#[derive(Default)]
pub struct Sequencer {
    senders: DashMap<(u64, String), Sender>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, chain_id: u64, sender: &str) -> Arc<Mutex<SenderState>> {
        self.senders
            .entry((chain_id, sender.to_lowercase()))
            .or_insert_with(|| Sender {
                account: sender.to_string(),
                state: Arc::default(),
            })
            .state
            .clone()
    }

    /// Every (chain, sender) that has allocated a number
    pub fn tracked(&self) -> Vec<(u64, String)> {
        self.senders
            .iter()
            .map(|entry| (entry.key().0, entry.value().account.clone()))
            .collect()
    }

    /// Allocate the next sequence number; `fetch` reads the ledger's next
    /// expected value and only runs the first time a sender is seen
    pub async fn next<F, Fut>(&self, chain_id: u64, sender: &str, fetch: F) -> RouterResult<u64>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RouterResult<u64>>,
    {
        // The map guard is dropped before the await below
        let state = self.state(chain_id, sender);
        let mut state = state.lock().await;

        let sequence = match state.next {
            Some(next) => next,
            None => {
                let seeded = fetch().await?;
                debug!(chain_id, sender, seeded, "Seeded sequence from ledger");
                seeded
            }
        };
        state.next = Some(sequence + 1);

        debug!(chain_id, sender, sequence, "Allocated sequence");
        Ok(sequence)
    }

    /// Record a broadcast transaction
    pub async fn mark_pending(&self, chain_id: u64, sender: &str, sequence: u64, tx_hash: &str) {
        let state = self.state(chain_id, sender);
        let mut state = state.lock().await;
        state.pending.insert(sequence, tx_hash.to_string());
    }

    /// Give back a number whose transaction was never broadcast
    pub async fn release(&self, chain_id: u64, sender: &str, sequence: u64) {
        let state = self.state(chain_id, sender);
        let mut state = state.lock().await;
        state.pending.remove(&sequence);

        // Only the most recent allocation can be handed out again
        if state.next == Some(sequence + 1) {
            state.next = Some(sequence);
            debug!(chain_id, sender, sequence, "Released sequence");
        } else {
            warn!(chain_id, sender, sequence, "Sequence released out of order, leaving gap");
        }
    }

    /// Align with the ledger's next expected value, dropping the pending
    /// transactions it has already included. Returns how many remain.
    pub async fn sync(&self, chain_id: u64, sender: &str, on_chain_next: u64) -> usize {
        let state = self.state(chain_id, sender);
        let mut state = state.lock().await;

        state.pending.retain(|sequence, _| *sequence >= on_chain_next);

        match state.next {
            Some(next) if next >= on_chain_next => {}
            Some(next) => {
                warn!(chain_id, sender, local = next, on_chain = on_chain_next, "Local sequence behind ledger");
                state.next = Some(on_chain_next);
            }
            None => state.next = Some(on_chain_next),
        }
        state.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouterError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_allocation_is_contiguous() {
        let sequencer = Arc::new(Sequencer::new());
        let fetches = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let sequencer = sequencer.clone();
            let fetches = fetches.clone();
            handles.push(tokio::spawn(async move {
                sequencer
                    .next(1, "0xAbC", || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        Ok(7)
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        let expected: HashSet<u64> = (7..39).collect();
        assert_eq!(seen, expected);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_senders_are_independent() {
        let sequencer = Sequencer::new();
        let a = sequencer.next(1, "a", || async { Ok(5) }).await.unwrap();
        let b = sequencer.next(1, "b", || async { Ok(100) }).await.unwrap();
        let c = sequencer.next(2, "a", || async { Ok(0) }).await.unwrap();
        assert_eq!((a, b, c), (5, 100, 0));
    }

    #[tokio::test]
    async fn test_failed_seed_allocates_nothing() {
        let sequencer = Sequencer::new();
        let err = sequencer
            .next(1, "a", || async {
                Err(RouterError::RpcQuery {
                    chain_id: 1,
                    message: "down".into(),
                })
            })
            .await;
        tokio_test::assert_err!(err);
        let next = sequencer.next(1, "a", || async { Ok(3) }).await;
        assert_eq!(tokio_test::assert_ok!(next), 3);
    }

    #[tokio::test]
    async fn test_release_and_sync() {
        let sequencer = Sequencer::new();
        let first = sequencer.next(1, "a", || async { Ok(10) }).await.unwrap();
        let second = sequencer.next(1, "a", || async { Ok(0) }).await.unwrap();
        assert_eq!((first, second), (10, 11));

        sequencer.release(1, "a", second).await;
        assert_eq!(sequencer.next(1, "a", || async { Ok(0) }).await.unwrap(), 11);

        sequencer.mark_pending(1, "a", 11, "0xhash").await;
        assert_eq!(sequencer.sync(1, "a", 11).await, 1);

        assert_eq!(sequencer.sync(1, "a", 20).await, 0);
        assert_eq!(sequencer.next(1, "a", || async { Ok(0) }).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_sync_prunes_included_transactions() {
        let sequencer = Sequencer::new();
        for _ in 0..5 {
            let sequence = sequencer.next(1, "GABC", || async { Ok(40) }).await.unwrap();
            sequencer
                .mark_pending(1, "GABC", sequence, &format!("0x{}", sequence))
                .await;
        }

        // Ledger included 40..=42, two still outstanding
        assert_eq!(sequencer.sync(1, "gabc", 43).await, 2);
        // A lagging node never moves the counter back
        assert_eq!(sequencer.sync(1, "GABC", 41).await, 2);
        assert_eq!(sequencer.next(1, "GABC", || async { Ok(0) }).await.unwrap(), 45);
        assert_eq!(sequencer.sync(1, "GABC", 46).await, 0);
    }

    #[tokio::test]
    async fn test_tracked_keeps_account_spelling() {
        let sequencer = Sequencer::new();
        sequencer.next(1, "GAbC", || async { Ok(1) }).await.unwrap();
        sequencer.next(1, "gabc", || async { Ok(1) }).await.unwrap();
        sequencer.next(2, "alice.near", || async { Ok(1) }).await.unwrap();

        let mut tracked = sequencer.tracked();
        tracked.sort();
        assert_eq!(
            tracked,
            vec![(1, "GAbC".to_string()), (2, "alice.near".to_string())]
        );
    }
}
