//! Duplicate protection for swap jobs
//!
//! A swap key is held while its job runs, and once signed the destination
//! transaction is remembered so a re-run rebroadcasts it instead of opening a
//! second signing session. Signed entries are never evicted: forgetting one
//! would let the same swap be signed twice.

use crate::error::{RouterError, RouterResult};
use crate::swap::{SignedTx, SwapKey};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

pub struct SwapGuard {
    in_flight: DashMap<SwapKey, ()>,
    signed: DashMap<SwapKey, SignedTx>,
}

impl SwapGuard {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            signed: DashMap::new(),
        }
    }

    /// Claim `key` until the returned guard is dropped
    pub fn acquire(self: &Arc<Self>, key: SwapKey) -> RouterResult<InFlight> {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => Err(RouterError::DuplicateSwap {
                key: key.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(InFlight {
                    guard: self.clone(),
                    key,
                })
            }
        }
    }

    pub fn is_in_flight(&self, key: &SwapKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn signed(&self, key: &SwapKey) -> Option<SignedTx> {
        self.signed.get(key).map(|s| s.value().clone())
    }

    pub fn record_signed(&self, key: SwapKey, signed: SignedTx) {
        self.signed.insert(key, signed);
    }

    pub fn signed_count(&self) -> usize {
        self.signed.len()
    }
}

impl Default for SwapGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases its key on drop
pub struct InFlight {
    guard: Arc<SwapGuard>,
    key: SwapKey,
}

impl InFlight {
    pub fn key(&self) -> &SwapKey {
        &self.key
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.guard.in_flight.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_duplicate_until_drop() {
        let guard = Arc::new(SwapGuard::new());
        let key = SwapKey::new(1, "0xAB", 0);

        let held = guard.acquire(key.clone()).unwrap();
        assert!(guard.is_in_flight(&key));
        assert!(matches!(
            guard.acquire(SwapKey::new(1, "0xab", 0)),
            Err(RouterError::DuplicateSwap { .. })
        ));
        // Other log of the same transaction is independent
        assert!(guard.acquire(SwapKey::new(1, "0xab", 1)).is_ok());

        drop(held);
        assert!(!guard.is_in_flight(&key));
        assert!(guard.acquire(key).is_ok());
    }

    fn signed_tx(n: usize) -> SignedTx {
        SignedTx {
            chain_id: 1,
            tx_hash: format!("0x{:x}", n),
            payload: vec![1u8, 2].into(),
        }
    }

    #[test]
    fn test_signed_lookup() {
        let guard = SwapGuard::new();
        let key = SwapKey::new(56, "0x01", 2);
        assert!(guard.signed(&key).is_none());
        guard.record_signed(key.clone(), signed_tx(0));
        assert_eq!(guard.signed(&key), Some(signed_tx(0)));
    }

    #[test]
    fn test_signed_swaps_survive_volume() {
        let guard = SwapGuard::new();
        let first = SwapKey::new(1, "0x00", 0);
        guard.record_signed(first.clone(), signed_tx(0));
        for n in 1..=20_000 {
            guard.record_signed(SwapKey::new(1, &format!("0x{:x}", n), 0), signed_tx(n));
        }
        assert_eq!(guard.signed_count(), 20_001);
        assert_eq!(guard.signed(&first), Some(signed_tx(0)));
    }
}
