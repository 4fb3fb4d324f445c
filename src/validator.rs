//! Validator registry, stake discipline, and deterministic leader draws.
//!
//! The registry is a plain map owned by the chain engine; every operation
//! here is a free function over it so the engine, the tests, and the demo
//! driver all go through the same rules.

use std::collections::HashMap;

use p256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{BLOCK_REWARD, GENESIS_VALIDATOR, MIN_STAKE, SLOTS_PER_EPOCH};
use crate::error::ChainError;

/// A registered block producer.
#[derive(Debug, Clone)]
pub struct Validator {
    pub name: String,
    pub stake: u64,
    /// Hex SEC1 uncompressed public key.
    pub pubkey: String,
    /// Present only for validators this node can produce for.
    pub signing_key: Option<SigningKey>,
    /// Last slot this validator produced in.
    pub last_slot: u64,
}

/// Per-validator discipline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorStats {
    pub missed_slots: u64,
    pub jailed_until_epoch: u64,
    pub slashed: bool,
}

pub type ValidatorSet = HashMap<String, Validator>;
pub type StatsMap = HashMap<String, ValidatorStats>;

// ============================================================================
// REGISTRY OPERATIONS
// ============================================================================

/// Register a validator or top up an existing one.
///
/// New entries must meet `MIN_STAKE`. Existing entries accumulate stake and
/// fill in a missing pubkey or signing key, but never overwrite either.
pub fn add_validator(
    validators: &mut ValidatorSet,
    stats: &mut StatsMap,
    name: &str,
    stake: u64,
    pubkey: &str,
    signing_key: Option<SigningKey>,
) -> Result<(), ChainError> {
    if name.is_empty() {
        return Err(ChainError::ValidatorNameRequired);
    }
    if stake == 0 {
        return Err(ChainError::StakeNotPositive);
    }
    if pubkey.is_empty() {
        return Err(ChainError::PubkeyRequired);
    }
    match validators.get_mut(name) {
        None => {
            if stake < MIN_STAKE {
                return Err(ChainError::StakeBelowMinimum);
            }
            validators.insert(
                name.to_string(),
                Validator {
                    name: name.to_string(),
                    stake,
                    pubkey: pubkey.to_string(),
                    signing_key,
                    last_slot: 0,
                },
            );
            stats.entry(name.to_string()).or_default();
        }
        Some(v) => {
            v.stake += stake;
            if v.pubkey.is_empty() {
                v.pubkey = pubkey.to_string();
            }
            if v.signing_key.is_none() {
                v.signing_key = signing_key;
            }
        }
    }
    Ok(())
}

/// Increase an existing validator's stake.
pub fn add_stake(validators: &mut ValidatorSet, name: &str, amount: u64) -> Result<(), ChainError> {
    if amount == 0 {
        return Err(ChainError::StakeNotPositive);
    }
    let v = validators
        .get_mut(name)
        .ok_or(ChainError::ValidatorNotFound)?;
    v.stake += amount;
    Ok(())
}

/// Withdraw stake. Unstaking to exactly zero removes the entry; leaving a
/// positive balance below `MIN_STAKE` is rejected.
pub fn unstake(validators: &mut ValidatorSet, name: &str, amount: u64) -> Result<(), ChainError> {
    if amount == 0 {
        return Err(ChainError::StakeNotPositive);
    }
    let v = validators
        .get_mut(name)
        .ok_or(ChainError::ValidatorNotFound)?;
    if amount > v.stake {
        return Err(ChainError::UnstakeExceedsStake);
    }
    let remaining = v.stake - amount;
    if remaining > 0 && remaining < MIN_STAKE {
        return Err(ChainError::StakeBelowMinimum);
    }
    if remaining == 0 {
        validators.remove(name);
    } else {
        v.stake = remaining;
    }
    Ok(())
}

/// Credit the block reward.
pub fn reward_validator(validators: &mut ValidatorSet, name: &str) {
    if let Some(v) = validators.get_mut(name) {
        v.stake += BLOCK_REWARD;
    }
}

/// Deduct stake. The entry is removed when the deduction consumes the whole
/// stake or leaves it below `MIN_STAKE`.
pub fn slash_validator(validators: &mut ValidatorSet, name: &str, amount: u64) {
    if amount == 0 {
        return;
    }
    let Some(v) = validators.get_mut(name) else {
        return;
    };
    if amount >= v.stake {
        validators.remove(name);
        return;
    }
    v.stake -= amount;
    if v.stake < MIN_STAKE {
        validators.remove(name);
    }
}

/// Percentage slash: `max(1, stake * percent / 100)`.
pub fn slash_validator_percent(validators: &mut ValidatorSet, name: &str, percent: u64) {
    if percent == 0 {
        return;
    }
    let Some(v) = validators.get(name) else {
        return;
    };
    let amount = (v.stake * percent / 100).max(1);
    slash_validator(validators, name, amount);
}

/// Whether a validator sits in jail at the given slot.
pub fn is_jailed(stats: &StatsMap, name: &str, slot: u64) -> bool {
    match stats.get(name) {
        Some(s) => slot / SLOTS_PER_EPOCH < s.jailed_until_epoch,
        None => false,
    }
}

// ============================================================================
// LEADER SELECTION
// ============================================================================

/// The stake-weighted draw for a slot: hash the little-endian slot number,
/// read the first eight bytes little-endian, reduce modulo total stake.
fn deterministic_draw(slot: u64, total_stake: u64) -> u64 {
    let sum = Sha256::digest(slot.to_le_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&sum[..8]);
    u64::from_le_bytes(buf) % total_stake
}

/// Draw a leader from a frozen snapshot's stake map. This is the selection
/// the engine uses; historical blocks stay verifiable because the snapshot
/// never changes after the epoch is frozen.
pub fn leader_from_snapshot(slot: u64, stakes: &HashMap<String, u64>) -> String {
    let total_stake: u64 = stakes.values().sum();
    if total_stake == 0 {
        return GENESIS_VALIDATOR.to_string();
    }
    let draw = deterministic_draw(slot, total_stake);
    let mut names: Vec<&String> = stakes.keys().collect();
    names.sort();
    let mut running = 0u64;
    for name in names {
        running += stakes[name];
        if draw < running {
            return name.clone();
        }
    }
    GENESIS_VALIDATOR.to_string()
}

/// Draw a leader from the live registry, skipping sub-minimum stake and
/// jailed validators. Pre-snapshot tooling only; the engine draws from
/// snapshots.
pub fn deterministic_leader(slot: u64, validators: &ValidatorSet, stats: &StatsMap) -> String {
    let eligible: HashMap<String, u64> = validators
        .values()
        .filter(|v| v.stake >= MIN_STAKE && !is_jailed(stats, &v.name, slot))
        .map(|v| (v.name.clone(), v.stake))
        .collect();
    leader_from_snapshot(slot, &eligible)
}
