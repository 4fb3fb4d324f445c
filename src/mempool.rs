//! Fee-priority transaction pool.
//!
//! The one component with intrinsic multi-producer semantics: a single mutex
//! guards the hash index and the sorted list for the whole duration of every
//! operation, so concurrent adds observe a total order and block selection
//! always works against the ordering at the moment of the call.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::block::Transaction;
use crate::crypto::verify_transaction_signature;
use crate::error::MempoolError;
use crate::state::{apply_with_fees, WorldState};

/// Thread-safe pool keyed by transaction hash, drained in fee order.
#[derive(Default)]
pub struct Mempool {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    by_hash: HashMap<String, Transaction>,
    /// Sorted by (fee desc, from asc, nonce asc).
    list: Vec<Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a transaction: hash present, signature valid, not seen before.
    pub fn add(&self, tx: Transaction) -> Result<(), MempoolError> {
        if tx.hash.is_empty() {
            return Err(MempoolError::MissingHash);
        }
        verify_transaction_signature(&tx)?;
        let mut inner = self.inner.lock();
        if inner.by_hash.contains_key(&tx.hash) {
            return Err(MempoolError::Duplicate);
        }
        inner.by_hash.insert(tx.hash.clone(), tx.clone());
        inner.list.push(tx);
        inner.list.sort_by(|a, b| {
            b.fee
                .cmp(&a.fee)
                .then_with(|| a.from.cmp(&b.from))
                .then_with(|| a.nonce.cmp(&b.nonce))
        });
        Ok(())
    }

    /// Select up to `max` transactions for a block.
    ///
    /// Walks the pool in priority order, applying each transaction against a
    /// working copy of `state` with fees credited to `producer`. Anything
    /// that fails to apply is skipped and stays queued for a later block.
    pub fn pop_for_block(&self, state: &WorldState, max: usize, producer: &str) -> Vec<Transaction> {
        if max == 0 {
            return Vec::new();
        }
        let mut inner = self.inner.lock();
        if inner.list.is_empty() {
            return Vec::new();
        }

        let mut selected = Vec::with_capacity(max);
        let mut working = state.clone();
        let list = std::mem::take(&mut inner.list);
        let mut remaining = Vec::with_capacity(list.len());

        for tx in list {
            if selected.len() >= max {
                remaining.push(tx);
                continue;
            }
            match apply_with_fees(&working, std::slice::from_ref(&tx), producer) {
                Ok(next) => {
                    working = next;
                    inner.by_hash.remove(&tx.hash);
                    selected.push(tx);
                }
                Err(_) => remaining.push(tx),
            }
        }
        inner.list = remaining;
        selected
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
