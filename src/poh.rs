//! Proof of history: a sequential SHA-256 tick chain as the time source.
//!
//! Each tick folds the tick number into the running hash, so the chain can
//! only be produced one step at a time and any block's `poh_hash` can be
//! re-derived by replaying from a known point.

use sha2::{Digest, Sha256};

use crate::block::Block;
use crate::config::TICKS_PER_SLOT;
use crate::error::ChainError;

/// Sequential hash-chain clock.
#[derive(Debug, Clone)]
pub struct Poh {
    pub current_tick: u64,
    pub hash: [u8; 32],
}

impl Poh {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            current_tick: 0,
            hash: seed,
        }
    }

    /// Advance the chain by `n` ticks, one hash per tick. Returns the
    /// resulting hash and the number of ticks advanced.
    pub fn tick(&mut self, n: u64) -> ([u8; 32], u64) {
        for _ in 0..n {
            self.current_tick += 1;
            self.hash = hash_poh(&self.hash, self.current_tick);
        }
        (self.hash, n)
    }

    /// Slot derived from the tick counter.
    pub fn slot(&self) -> u64 {
        self.current_tick / TICKS_PER_SLOT
    }
}

/// One chain step: `SHA256(prev || decimal(tick))`.
pub fn hash_poh(prev: &[u8; 32], tick: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev);
    hasher.update(tick.to_string().as_bytes());
    hasher.finalize().into()
}

/// Derive the chain seed from initialization entropy:
/// `SHA256("poh|" || decimal(nonce))`.
pub fn seed_from_nonce(nonce: i64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"poh|");
    hasher.update(nonce.to_string().as_bytes());
    hasher.finalize().into()
}

pub fn poh_hash_hex(hash: &[u8; 32]) -> String {
    hex::encode(hash)
}

pub fn parse_poh_hash_hex(s: &str) -> Result<[u8; 32], ChainError> {
    let raw = hex::decode(s).map_err(|_| ChainError::Crypto("invalid poh hash hex".into()))?;
    raw.try_into()
        .map_err(|_| ChainError::Crypto("invalid poh hash length".into()))
}

/// Replay the chain from a known `(hash, tick)` point and check a block's
/// PoH fields. On success returns the new known point for the next block.
pub fn verify_poh(
    expected_hash: [u8; 32],
    expected_tick: u64,
    block: &Block,
) -> Result<([u8; 32], u64), ChainError> {
    if block.tick <= expected_tick {
        return Err(ChainError::TickNotIncreasing { index: block.index });
    }
    if block.tick / TICKS_PER_SLOT != block.slot {
        return Err(ChainError::SlotMismatch { index: block.index });
    }
    let mut hash = expected_hash;
    for tick in expected_tick + 1..=block.tick {
        hash = hash_poh(&hash, tick);
    }
    let recorded = parse_poh_hash_hex(&block.poh_hash)?;
    if recorded != hash {
        return Err(ChainError::InvalidPohHash { index: block.index });
    }
    Ok((hash, block.tick))
}
