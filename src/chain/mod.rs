//! The chain engine.
//!
//! A hash-keyed block DAG with a derived canonical chain. Block production
//! and external acceptance run the same validation pipeline; fork choice is
//! a strict (weight, slot, hash) comparison gated by a reorg guard that
//! protects the finalized frontier; stake snapshots freeze per epoch so
//! historical leader draws stay verifiable; equivocation and chronic missed
//! slots cost stake and jail time.
//!
//! The engine is single-threaded. Callers that share it across threads must
//! serialize access externally.

pub mod fork_choice;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::block::{Block, Transaction};
use crate::clock::Clock;
use crate::config::{
    ChainConfig, GENESIS_PARENT, GENESIS_VALIDATOR, JAIL_EPOCHS, MAX_MISSED_SLOTS, MIN_STAKE,
    SLASH_PENALTY, SLASH_PERCENT, SLOTS_PER_EPOCH, TICKS_PER_SLOT,
};
use crate::crypto::{
    sign_block, state_root, tx_root, verify_block_signature, verify_transactions,
};
use crate::error::{ChainError, StorageError};
use crate::logger::ChainLogger;
use crate::poh::{poh_hash_hex, seed_from_nonce, verify_poh, Poh};
use crate::state::{apply_transactions, Account, WorldState};
use crate::storage::{BlockStore, SnapshotStore};
use crate::validator::{
    is_jailed, leader_from_snapshot, reward_validator, slash_validator, slash_validator_percent,
    StatsMap, ValidatorSet, ValidatorStats,
};

pub use fork_choice::{better_score, reorg_depth_and_slot, ChainScore, ReorgMetrics};

// ============================================================================
// SUPPORTING TYPES
// ============================================================================

/// Evidence that one validator signed two different blocks for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivocationProof {
    pub slot: u64,
    pub validator: String,
    pub block_a: String,
    pub block_b: String,
}

/// Stake map frozen at the first referenced slot of an epoch. Never mutated
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSnapshot {
    pub epoch: u64,
    pub total_stake: u64,
    pub validators: HashMap<String, u64>,
}

/// Per-validator production report over the canonical chain.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatorSummary {
    pub name: String,
    pub produced: u64,
    pub missed: u64,
    pub miss_rate: f64,
    pub slashed: bool,
    pub jailed_until: u64,
}

/// A childless block in the DAG, scored for fork-choice ranking.
#[derive(Debug, Clone, Serialize)]
pub struct ForkCandidate {
    pub hash: String,
    pub slot: u64,
    pub cumulative_weight: u64,
    pub parent: String,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Single-node chain engine: block DAG, canonical tip, validator registry,
/// world state, epoch snapshots, and discipline bookkeeping.
pub struct Blockchain {
    /// Canonical chain, genesis to tip. Derived from the DAG.
    pub chain: Vec<Block>,
    /// Every accepted block, keyed by hash.
    pub blocks: HashMap<String, Block>,
    /// Child hash to parent hash.
    pub parents: HashMap<String, String>,
    pub canonical_tip: String,
    pub validators: ValidatorSet,
    pub stats: StatsMap,
    poh: Option<Poh>,
    /// World state at the canonical tip.
    pub state: WorldState,
    /// Balances seeded before the first produced block.
    pub genesis: WorldState,
    /// Canonical producer per slot.
    pub slot_produced: HashMap<u64, String>,
    /// Every producer observed per slot, for equivocation detection.
    slot_producers: HashMap<u64, HashMap<String, String>>,
    pub equivocations: Vec<EquivocationProof>,
    pub last_processed_slot: u64,
    pub finalized_slot: u64,
    pub config: ChainConfig,
    reorg_stats: ReorgMetrics,
    logger: Box<dyn ChainLogger>,
    snapshots: HashMap<u64, EpochSnapshot>,
    current_epoch: u64,
    block_store: Option<Arc<dyn BlockStore>>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
}

impl Blockchain {
    /// Build an engine with a genesis block. The PoH chain is seeded from
    /// `config.poh_seed` in deterministic mode, otherwise from the clock.
    pub fn new(config: ChainConfig, clock: &dyn Clock, logger: Box<dyn ChainLogger>) -> Self {
        let config = config.normalized();
        let nonce = if config.deterministic_poh {
            config.poh_seed
        } else {
            clock.unix_nanos()
        };
        let seed = seed_from_nonce(nonce);
        let genesis = genesis_block(&seed);

        let mut bc = Self {
            chain: Vec::new(),
            blocks: HashMap::new(),
            parents: HashMap::new(),
            canonical_tip: String::new(),
            validators: ValidatorSet::new(),
            stats: StatsMap::new(),
            poh: Some(Poh::new(seed)),
            state: WorldState::new(),
            genesis: WorldState::new(),
            slot_produced: HashMap::new(),
            slot_producers: HashMap::new(),
            equivocations: Vec::new(),
            last_processed_slot: 0,
            finalized_slot: 0,
            config,
            reorg_stats: ReorgMetrics::default(),
            logger,
            snapshots: HashMap::new(),
            current_epoch: 0,
            block_store: None,
            snapshot_store: None,
        };
        bc.canonical_tip = genesis.hash.clone();
        bc.insert_block(genesis);
        bc.rebuild_canonical_chain();
        bc.update_finality();
        bc
    }

    /// Attach storage collaborators. Blocks already on the canonical chain
    /// that the store does not know yet are backfilled, so a fresh store
    /// always starts with the genesis block.
    pub fn set_storage(
        &mut self,
        blocks: Arc<dyn BlockStore>,
        snapshots: Arc<dyn SnapshotStore>,
    ) {
        for block in &self.chain {
            match blocks.block_by_hash(&block.hash) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    if let Err(e) = blocks.save_block(block) {
                        self.logger
                            .warn(&format!("block backfill failed index={}: {e}", block.index));
                    }
                }
                Err(e) => self.logger.warn(&format!("block store probe failed: {e}")),
            }
        }
        self.block_store = Some(blocks);
        self.snapshot_store = Some(snapshots);
    }

    /// Seed a balance. Balances set while the chain is still at genesis are
    /// recorded as the genesis allocation that canonical replays start from.
    pub fn set_balance(&mut self, address: &str, amount: u64) {
        self.state
            .insert(address.to_string(), Account::with_balance(amount));
        if self.chain.len() <= 1 {
            self.genesis
                .insert(address.to_string(), Account::with_balance(amount));
        }
    }

    /// Register a validator or top up an existing one.
    pub fn add_validator(
        &mut self,
        name: &str,
        stake: u64,
        pubkey: &str,
        signing_key: Option<p256::ecdsa::SigningKey>,
    ) -> Result<(), ChainError> {
        crate::validator::add_validator(
            &mut self.validators,
            &mut self.stats,
            name,
            stake,
            pubkey,
            signing_key,
        )
    }

    // ------------------------------------------------------------------
    // Block production and acceptance
    // ------------------------------------------------------------------

    /// Produce a block on the canonical tip.
    ///
    /// Advances PoH one slot, draws the leader from that slot's snapshot,
    /// validates and applies `txs`, signs with the leader's key, and runs
    /// the block through the same acceptance checks as an external block.
    /// Any validation failure slashes the leader by `SLASH_PENALTY`.
    pub fn add_block(&mut self, txs: Vec<Transaction>) -> Result<(), ChainError> {
        if self.validators.is_empty() {
            return Err(ChainError::NoValidators);
        }
        let prev = self
            .blocks
            .get(&self.canonical_tip)
            .cloned()
            .ok_or(ChainError::UnknownParent)?;
        let (slot, tick, poh_hash) = self.advance_poh()?;
        self.ensure_snapshot_for_slot(slot);
        let validator = self.leader_for_slot(slot);

        if let Err(e) = verify_transactions(&txs) {
            self.slash_production_failure(&validator);
            return Err(e);
        }
        let next_state = match apply_transactions(&self.state, &txs) {
            Ok(s) => s,
            Err(e) => {
                self.slash_production_failure(&validator);
                return Err(e);
            }
        };

        let block = match self.assemble_and_sign(&prev, slot, tick, poh_hash, &validator, txs, &next_state)
        {
            Ok(b) => b,
            Err(e) => {
                self.slash_production_failure(&validator);
                return Err(e);
            }
        };

        if let Err(e) = self.verify_on_accept(&prev, &block, &self.state) {
            self.slash_production_failure(&validator);
            return Err(e);
        }

        let equivocation = self.register_slot_producer(&block);
        self.persist_block(&block);
        self.insert_block(block.clone());
        self.update_canonical(&block.hash);
        reward_validator(&mut self.validators, &validator);
        self.mark_produced(&validator, slot);
        let tip_slot = self.tip_slot();
        self.process_missed_slots(tip_slot);
        equivocation
    }

    /// Accept a block built on an arbitrary known parent. The pre-state is
    /// reconstructed by replaying the chain from genesis to that parent.
    /// Returns the new block's hash.
    pub fn add_block_external(
        &mut self,
        prev_hash: &str,
        txs: Vec<Transaction>,
    ) -> Result<String, ChainError> {
        if self.validators.is_empty() {
            return Err(ChainError::NoValidators);
        }
        let parent = self
            .blocks
            .get(prev_hash)
            .cloned()
            .ok_or(ChainError::UnknownParent)?;
        let (slot, tick, poh_hash) = self.advance_poh()?;
        self.ensure_snapshot_for_slot(slot);
        let validator = self.leader_for_slot(slot);

        if let Err(e) = verify_transactions(&txs) {
            self.slash_production_failure(&validator);
            return Err(e);
        }
        let parent_state = self.state_at_tip(prev_hash)?;
        let next_state = match apply_transactions(&parent_state, &txs) {
            Ok(s) => s,
            Err(e) => {
                self.slash_production_failure(&validator);
                return Err(e);
            }
        };

        let block = match self.assemble_and_sign(&parent, slot, tick, poh_hash, &validator, txs, &next_state)
        {
            Ok(b) => b,
            Err(e) => {
                self.slash_production_failure(&validator);
                return Err(e);
            }
        };

        if let Err(e) = self.verify_on_accept(&parent, &block, &parent_state) {
            self.slash_production_failure(&validator);
            return Err(e);
        }

        let hash = block.hash.clone();
        let equivocation = self.register_slot_producer(&block);
        self.persist_block(&block);
        self.insert_block(block.clone());
        self.update_canonical(&hash);
        reward_validator(&mut self.validators, &validator);
        self.mark_produced(&validator, slot);
        let tip_slot = self.tip_slot();
        self.process_missed_slots(tip_slot);
        equivocation?;
        Ok(hash)
    }

    fn advance_poh(&mut self) -> Result<(u64, u64, String), ChainError> {
        let poh = self.poh.as_mut().ok_or(ChainError::PohUninitialized)?;
        poh.tick(TICKS_PER_SLOT);
        Ok((poh.slot(), poh.current_tick, poh_hash_hex(&poh.hash)))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_and_sign(
        &self,
        parent: &Block,
        slot: u64,
        tick: u64,
        poh_hash: String,
        validator: &str,
        txs: Vec<Transaction>,
        next_state: &WorldState,
    ) -> Result<Block, ChainError> {
        let mut block = Block {
            index: parent.index + 1,
            prev_hash: parent.hash.clone(),
            slot,
            tick,
            validator: validator.to_string(),
            tx_root: tx_root(&txs),
            state_root: state_root(next_state),
            poh_hash,
            signature: String::new(),
            hash: String::new(),
            transactions: txs,
        };
        let key = self
            .validators
            .get(validator)
            .and_then(|v| v.signing_key.clone())
            .ok_or(ChainError::MissingSigningKey)?;
        sign_block(&key, &mut block)?;
        Ok(block)
    }

    fn slash_production_failure(&mut self, validator: &str) {
        slash_validator(&mut self.validators, validator, SLASH_PENALTY);
    }

    fn mark_produced(&mut self, validator: &str, slot: u64) {
        if let Some(v) = self.validators.get_mut(validator) {
            v.last_slot = slot;
        }
    }

    /// The acceptance predicate shared by production and external blocks.
    /// Checks run in order; the first failure is returned. The slot's
    /// snapshot must already exist, this method never creates one.
    fn verify_on_accept(
        &self,
        parent: &Block,
        block: &Block,
        pre_state: &WorldState,
    ) -> Result<(), ChainError> {
        if block.prev_hash != parent.hash {
            return Err(ChainError::InvalidPrevHash { index: block.index });
        }
        let snap = self
            .snapshots
            .get(&self.epoch_for_slot(block.slot))
            .ok_or(ChainError::MissingSnapshot { slot: block.slot })?;
        if leader_from_snapshot(block.slot, &snap.validators) != block.validator {
            return Err(ChainError::WrongLeader { slot: block.slot });
        }
        verify_transactions(&block.transactions)?;
        if tx_root(&block.transactions) != block.tx_root {
            return Err(ChainError::InvalidTxRoot { index: block.index });
        }
        let next_state = apply_transactions(pre_state, &block.transactions)?;
        if state_root(&next_state) != block.state_root {
            return Err(ChainError::InvalidStateRoot { index: block.index });
        }
        let validator = self
            .validators
            .get(&block.validator)
            .ok_or_else(|| ChainError::UnknownValidator {
                name: block.validator.clone(),
            })?;
        verify_block_signature(block, &validator.pubkey)
    }

    fn insert_block(&mut self, block: Block) {
        self.parents
            .insert(block.hash.clone(), block.prev_hash.clone());
        self.blocks.insert(block.hash.clone(), block);
    }

    fn persist_block(&self, block: &Block) {
        if let Some(store) = &self.block_store {
            if let Err(e) = store.save_block(block) {
                self.logger
                    .warn(&format!("block persistence failed index={}: {e}", block.index));
            }
        }
    }

    // ------------------------------------------------------------------
    // Equivocation
    // ------------------------------------------------------------------

    /// Record the producer for a slot. A second, different hash from the
    /// same producer is an equivocation: the block is still inserted by the
    /// caller so the evidence survives, but a proof is recorded and the
    /// validator is slashed and jailed.
    fn register_slot_producer(&mut self, block: &Block) -> Result<(), ChainError> {
        let slot_map = self.slot_producers.entry(block.slot).or_default();
        if let Some(existing) = slot_map.get(&block.validator) {
            if *existing != block.hash {
                let existing = existing.clone();
                let proof = self.handle_equivocation(
                    &block.validator,
                    block.slot,
                    &existing,
                    &block.hash,
                );
                return Err(ChainError::Equivocation { proof });
            }
            return Ok(());
        }
        slot_map.insert(block.validator.clone(), block.hash.clone());
        Ok(())
    }

    fn handle_equivocation(
        &mut self,
        validator: &str,
        slot: u64,
        block_a: &str,
        block_b: &str,
    ) -> EquivocationProof {
        let proof = EquivocationProof {
            slot,
            validator: validator.to_string(),
            block_a: block_a.to_string(),
            block_b: block_b.to_string(),
        };
        self.equivocations.push(proof.clone());
        let stats = self.stats.entry(validator.to_string()).or_default();
        stats.slashed = true;
        stats.jailed_until_epoch = slot / SLOTS_PER_EPOCH + JAIL_EPOCHS;
        let jailed_until = stats.jailed_until_epoch;
        slash_validator_percent(&mut self.validators, validator, SLASH_PERCENT);
        self.logger.error(&format!(
            "equivocation detected validator={validator} slot={slot} block1={block_a} block2={block_b} jailed_until={jailed_until}"
        ));
        proof
    }

    // ------------------------------------------------------------------
    // Fork choice
    // ------------------------------------------------------------------

    /// Score a tip: cumulative snapshot weight along its ancestry, tip slot,
    /// tip hash. Unknown tips score zero.
    pub fn score_tip(&mut self, tip_hash: &str) -> ChainScore {
        let Some(block) = self.blocks.get(tip_hash) else {
            return ChainScore::default();
        };
        let (slot, hash) = (block.slot, block.hash.clone());
        let mut ancestry = Vec::new();
        let mut cur = block;
        loop {
            ancestry.push((cur.slot, cur.validator.clone()));
            if cur.prev_hash == GENESIS_PARENT {
                break;
            }
            match self.blocks.get(&cur.prev_hash) {
                Some(parent) => cur = parent,
                None => break,
            }
        }
        let mut cumulative_weight = 0u64;
        for (ancestor_slot, ancestor_validator) in ancestry {
            cumulative_weight += self.snapshot_stake(ancestor_slot, &ancestor_validator);
        }
        ChainScore {
            slot,
            cumulative_weight,
            hash,
        }
    }

    fn cumulative_weight_cached(&mut self, hash: &str, cache: &mut HashMap<String, u64>) -> u64 {
        if let Some(weight) = cache.get(hash) {
            return *weight;
        }
        // Walk down to the nearest cached ancestor, then fold back up.
        let mut pending: Vec<(String, u64, String)> = Vec::new();
        let mut cur = hash.to_string();
        let mut base = 0u64;
        loop {
            if let Some(weight) = cache.get(&cur) {
                base = *weight;
                break;
            }
            let Some(block) = self.blocks.get(&cur) else {
                break;
            };
            pending.push((cur.clone(), block.slot, block.validator.clone()));
            if block.prev_hash == GENESIS_PARENT {
                break;
            }
            cur = block.prev_hash.clone();
        }
        let mut weight = base;
        while let Some((block_hash, slot, validator)) = pending.pop() {
            weight += self.snapshot_stake(slot, &validator);
            cache.insert(block_hash, weight);
        }
        weight
    }

    /// Try to move the canonical tip. Returns whether it moved.
    ///
    /// The candidate must strictly beat the current score, and a reorg must
    /// additionally clear the guard: it may not touch the finalized
    /// frontier, exceed the depth bound, or bring less than the configured
    /// weight delta. Each guard decision emits one log line and bumps the
    /// matching counter; rejections are invisible to the caller.
    fn update_canonical(&mut self, tip_hash: &str) -> bool {
        if self.canonical_tip.is_empty() {
            self.canonical_tip = tip_hash.to_string();
            self.rebuild_canonical_chain();
            self.update_finality();
            return true;
        }
        let current_tip = self.canonical_tip.clone();
        let current = self.score_tip(&current_tip);
        let candidate = self.score_tip(tip_hash);
        if !better_score(&candidate, &current) {
            return false;
        }
        let new_chain = match self.chain_from_tip(tip_hash) {
            Ok(chain) => chain,
            Err(_) => return false,
        };
        let (depth, diverge_slot) = reorg_depth_and_slot(&self.chain, &new_chain);
        let to_slot = new_chain.last().map(|b| b.slot).unwrap_or(0);

        if self.finalized_slot > 0 && diverge_slot <= self.finalized_slot {
            self.reorg_stats.critical += 1;
            self.logger.critical(&format!(
                "reorg attempt touching finalized slot={diverge_slot}"
            ));
            return false;
        }
        if depth > self.config.max_reorg_depth {
            self.reorg_stats.error += 1;
            self.logger.error(&format!(
                "reorg rejected depth={depth} exceeds max={} (from_slot={diverge_slot} to_slot={to_slot})",
                self.config.max_reorg_depth
            ));
            return false;
        }
        if !self.weight_delta_satisfied(current.cumulative_weight, candidate.cumulative_weight) {
            let (required, actual) =
                self.weight_delta_required(current.cumulative_weight, candidate.cumulative_weight);
            self.reorg_stats.error += 1;
            self.logger.error(&format!(
                "reorg rejected: insufficient weight delta required={required} actual={actual} min_delta_pct={}",
                self.config.min_reorg_weight_delta_pct
            ));
            return false;
        }
        if depth > 0 {
            if depth > 1 {
                self.reorg_stats.warn += 1;
                self.logger.warn(&format!(
                    "reorg detected depth={depth} (from_slot={diverge_slot} to_slot={to_slot})"
                ));
            } else {
                self.reorg_stats.info += 1;
                self.logger.info(&format!(
                    "reorg detected depth={depth} (from_slot={diverge_slot} to_slot={to_slot})"
                ));
            }
        }
        self.canonical_tip = tip_hash.to_string();
        self.chain = new_chain;
        self.rebuild_slot_map();
        self.rebuild_state_from_canonical();
        self.update_finality();
        true
    }

    fn weight_delta_satisfied(&mut self, old_weight: u64, new_weight: u64) -> bool {
        if self.config.min_reorg_weight_delta_pct == 0 {
            return true;
        }
        if new_weight <= old_weight {
            return false;
        }
        let active = self.active_stake();
        let min_delta = (active * self.config.min_reorg_weight_delta_pct / 100).max(1);
        new_weight >= old_weight + min_delta
    }

    /// Required and actual weight gain for a candidate tip, for tooling.
    pub fn weight_delta_required(&mut self, old_weight: u64, new_weight: u64) -> (u64, u64) {
        let active = self.active_stake();
        let min_delta = (active * self.config.min_reorg_weight_delta_pct / 100).max(1);
        let actual = new_weight.saturating_sub(old_weight);
        (min_delta, actual)
    }

    fn active_stake(&mut self) -> u64 {
        let tip_slot = self.tip_slot();
        self.snapshot_for_slot(tip_slot).total_stake
    }

    // ------------------------------------------------------------------
    // Canonical chain and finality
    // ------------------------------------------------------------------

    fn rebuild_canonical_chain(&mut self) {
        if self.canonical_tip.is_empty() {
            self.chain.clear();
            return;
        }
        if let Ok(chain) = self.chain_from_tip(&self.canonical_tip.clone()) {
            self.chain = chain;
        }
        self.rebuild_slot_map();
        self.rebuild_state_from_canonical();
    }

    fn chain_from_tip(&self, tip_hash: &str) -> Result<Vec<Block>, ChainError> {
        if tip_hash.is_empty() {
            return Err(ChainError::UnknownParent);
        }
        let mut chain = Vec::new();
        let mut cur_hash = tip_hash.to_string();
        loop {
            let cur = self
                .blocks
                .get(&cur_hash)
                .ok_or(ChainError::UnknownParent)?;
            chain.push(cur.clone());
            if cur.prev_hash == GENESIS_PARENT {
                break;
            }
            cur_hash = cur.prev_hash.clone();
        }
        chain.reverse();
        Ok(chain)
    }

    fn rebuild_slot_map(&mut self) {
        self.slot_produced.clear();
        for block in self.chain.iter().skip(1) {
            self.slot_produced
                .insert(block.slot, block.validator.clone());
        }
    }

    fn rebuild_state_from_canonical(&mut self) {
        let mut state = self.genesis.clone();
        for block in self.chain.iter().skip(1) {
            match apply_transactions(&state, &block.transactions) {
                Ok(next) => state = next,
                Err(_) => return,
            }
        }
        self.state = state;
    }

    fn update_finality(&mut self) {
        let tip_slot = self.tip_slot();
        if tip_slot < self.config.finality_slots {
            return;
        }
        let finalized = tip_slot - self.config.finality_slots;
        if finalized > self.finalized_slot {
            self.finalized_slot = finalized;
        }
    }

    fn tip_slot(&self) -> u64 {
        self.chain.last().map(|b| b.slot).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Epoch snapshots
    // ------------------------------------------------------------------

    fn epoch_for_slot(&self, slot: u64) -> u64 {
        if self.config.epoch_length == 0 {
            return 0;
        }
        slot / self.config.epoch_length
    }

    fn ensure_snapshot_for_slot(&mut self, slot: u64) {
        let epoch = self.epoch_for_slot(slot);
        self.ensure_snapshot(epoch);
    }

    /// Freeze the stake map for an epoch from the live registry. Idempotent;
    /// a frozen snapshot is never recomputed.
    fn ensure_snapshot(&mut self, epoch: u64) {
        if self.snapshots.contains_key(&epoch) {
            return;
        }
        let epoch_slot = epoch * self.config.epoch_length;
        let mut validators = HashMap::new();
        let mut total_stake = 0u64;
        for v in self.validators.values() {
            if v.stake < MIN_STAKE {
                continue;
            }
            if is_jailed(&self.stats, &v.name, epoch_slot) {
                continue;
            }
            validators.insert(v.name.clone(), v.stake);
            total_stake += v.stake;
        }
        let snapshot = EpochSnapshot {
            epoch,
            total_stake,
            validators,
        };
        if let Some(store) = &self.snapshot_store {
            let root = state_root(&self.state);
            if let Err(e) = store.save_epoch_snapshot(epoch, &root, &snapshot.validators) {
                self.logger
                    .warn(&format!("snapshot persistence failed epoch={epoch}: {e}"));
            }
        }
        self.snapshots.insert(epoch, snapshot);
        self.current_epoch = epoch;
    }

    fn snapshot_for_slot(&mut self, slot: u64) -> &EpochSnapshot {
        let epoch = self.epoch_for_slot(slot);
        self.ensure_snapshot(epoch);
        &self.snapshots[&epoch]
    }

    fn snapshot_stake(&mut self, slot: u64, validator: &str) -> u64 {
        self.snapshot_for_slot(slot)
            .validators
            .get(validator)
            .copied()
            .unwrap_or(0)
    }

    fn leader_for_slot(&mut self, slot: u64) -> String {
        let snap = self.snapshot_for_slot(slot);
        leader_from_snapshot(slot, &snap.validators)
    }

    /// Copy of the snapshot covering `slot`, creating it if needed.
    pub fn epoch_snapshot(&mut self, slot: u64) -> EpochSnapshot {
        self.snapshot_for_slot(slot).clone()
    }

    /// Copies of every frozen snapshot, epoch-ordered.
    pub fn all_epoch_snapshots(&self) -> Vec<EpochSnapshot> {
        let mut epochs: Vec<u64> = self.snapshots.keys().copied().collect();
        epochs.sort_unstable();
        epochs
            .into_iter()
            .filter_map(|e| self.snapshots.get(&e).cloned())
            .collect()
    }

    // ------------------------------------------------------------------
    // Missed slots
    // ------------------------------------------------------------------

    /// Charge leaders for slots they failed to fill, from the slot after the
    /// last processed one up to `target_slot`. Crossing `MAX_MISSED_SLOTS`
    /// costs a percentage slash and jail time, and resets the counter.
    fn process_missed_slots(&mut self, target_slot: u64) {
        if target_slot <= self.last_processed_slot {
            return;
        }
        for slot in self.last_processed_slot + 1..=target_slot {
            let leader = self.leader_for_slot(slot);
            if leader == GENESIS_VALIDATOR {
                continue;
            }
            let produced = self.slot_produced.get(&slot).cloned().unwrap_or_default();
            if produced != leader {
                let stats = self.stats.entry(leader.clone()).or_default();
                stats.missed_slots += 1;
                if stats.missed_slots > MAX_MISSED_SLOTS {
                    stats.missed_slots = 0;
                    stats.jailed_until_epoch = slot / SLOTS_PER_EPOCH + JAIL_EPOCHS;
                    slash_validator_percent(&mut self.validators, &leader, SLASH_PERCENT);
                }
            }
        }
        self.last_processed_slot = target_slot;
    }

    // ------------------------------------------------------------------
    // Full-chain verification
    // ------------------------------------------------------------------

    /// Replay the whole canonical chain from genesis, re-running block
    /// acceptance plus PoH continuity, link monotonicity, hash
    /// recomputation, and single-producer-per-slot. Any failure slashes the
    /// offending validator and aborts.
    pub fn verify_chain(&mut self) -> Result<(), ChainError> {
        if self.chain.is_empty() {
            return Err(ChainError::EmptyChain);
        }
        let chain = self.chain.clone();
        let genesis = &chain[0];
        if genesis.hash != hex::encode(genesis.digest()) {
            return Err(ChainError::InvalidBlockHash { index: 0 });
        }
        let mut expected_hash = crate::poh::parse_poh_hash_hex(&genesis.poh_hash)?;
        let mut expected_tick = genesis.tick;
        let mut seen_slots: HashMap<u64, String> = HashMap::new();
        let mut state = self.genesis.clone();

        for window in chain.windows(2) {
            let (prev, cur) = (&window[0], &window[1]);
            if let Err(e) = verify_block_link(prev, cur) {
                return self.fail_verification(&cur.validator, e);
            }
            match verify_poh(expected_hash, expected_tick, cur) {
                Ok((hash, tick)) => {
                    expected_hash = hash;
                    expected_tick = tick;
                }
                Err(e) => return self.fail_verification(&cur.validator, e),
            }
            if cur.hash != hex::encode(cur.digest()) {
                return self.fail_verification(
                    &cur.validator,
                    ChainError::InvalidBlockHash { index: cur.index },
                );
            }
            let snap = self.snapshot_for_slot(cur.slot).clone();
            if leader_from_snapshot(cur.slot, &snap.validators) != cur.validator {
                return self
                    .fail_verification(&cur.validator, ChainError::WrongLeader { slot: cur.slot });
            }
            if seen_slots.contains_key(&cur.slot) {
                return self
                    .fail_verification(&cur.validator, ChainError::DoubleProduce { slot: cur.slot });
            }
            seen_slots.insert(cur.slot, cur.validator.clone());
            let pubkey = match self.validators.get(&cur.validator) {
                Some(v) if v.stake >= MIN_STAKE => v.pubkey.clone(),
                _ => {
                    return self.fail_verification(
                        &cur.validator,
                        ChainError::UnknownValidator {
                            name: cur.validator.clone(),
                        },
                    )
                }
            };
            if let Err(e) = verify_block_signature(cur, &pubkey) {
                return self.fail_verification(&cur.validator, e);
            }
            if let Err(e) = verify_transactions(&cur.transactions) {
                return self.fail_verification(&cur.validator, e);
            }
            if tx_root(&cur.transactions) != cur.tx_root {
                return self
                    .fail_verification(&cur.validator, ChainError::InvalidTxRoot { index: cur.index });
            }
            let next_state = match apply_transactions(&state, &cur.transactions) {
                Ok(s) => s,
                Err(e) => return self.fail_verification(&cur.validator, e),
            };
            if state_root(&next_state) != cur.state_root {
                return self.fail_verification(
                    &cur.validator,
                    ChainError::InvalidStateRoot { index: cur.index },
                );
            }
            state = next_state;
        }
        Ok(())
    }

    fn fail_verification(&mut self, validator: &str, e: ChainError) -> Result<(), ChainError> {
        slash_validator(&mut self.validators, validator, SLASH_PENALTY);
        Err(e)
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Rebuild the DAG and canonical tip from the block log. Snapshot state
    /// replay is deferred; the latest stored snapshot is probed only.
    pub fn restore_from_storage(
        &mut self,
        block_store: &dyn BlockStore,
        snapshot_store: Option<&dyn SnapshotStore>,
    ) -> Result<(), StorageError> {
        if let Some(store) = snapshot_store {
            let _ = store.load_latest_snapshot();
        }
        let tip = match block_store.tip()? {
            Some(tip) => tip,
            None => return Ok(()),
        };
        let blocks = block_store.range(0, tip.index)?;
        self.blocks.clear();
        self.parents.clear();
        for block in blocks {
            self.insert_block(block);
        }
        self.canonical_tip = tip.hash.clone();
        self.rebuild_canonical_chain();
        self.update_finality();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    pub fn canonical_tip_hash(&self) -> &str {
        &self.canonical_tip
    }

    /// Highest epoch a snapshot has been frozen for.
    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    pub fn reorg_stats(&self) -> ReorgMetrics {
        self.reorg_stats
    }

    pub fn reset_reorg_stats(&mut self) {
        self.reorg_stats = ReorgMetrics::default();
    }

    /// Per-validator production report, name-ordered.
    pub fn validator_summaries(&self) -> Vec<ValidatorSummary> {
        let mut names: Vec<&String> = self.validators.keys().collect();
        names.sort();

        let mut produced: HashMap<&str, u64> = HashMap::new();
        for validator in self.slot_produced.values() {
            *produced.entry(validator).or_default() += 1;
        }

        names
            .into_iter()
            .map(|name| {
                let stats = self.stats.get(name).copied().unwrap_or_default();
                let produced = produced.get(name.as_str()).copied().unwrap_or(0);
                let total = produced + stats.missed_slots;
                let miss_rate = if total > 0 {
                    stats.missed_slots as f64 / total as f64
                } else {
                    0.0
                };
                ValidatorSummary {
                    name: name.clone(),
                    produced,
                    missed: stats.missed_slots,
                    miss_rate,
                    slashed: stats.slashed,
                    jailed_until: stats.jailed_until_epoch,
                }
            })
            .collect()
    }

    /// Every childless block in the DAG, scored and ranked by fork choice.
    pub fn fork_candidates(&mut self) -> Vec<ForkCandidate> {
        if self.blocks.is_empty() {
            return Vec::new();
        }
        let mut has_child: std::collections::HashSet<String> = std::collections::HashSet::new();
        for parent in self.parents.values() {
            if !parent.is_empty() && parent != GENESIS_PARENT {
                has_child.insert(parent.clone());
            }
        }
        let tips: Vec<(String, String)> = self
            .blocks
            .iter()
            .filter(|(hash, _)| !has_child.contains(hash.as_str()))
            .map(|(hash, block)| (hash.clone(), block.prev_hash.clone()))
            .collect();

        let mut cache: HashMap<String, u64> = HashMap::new();
        let mut candidates: Vec<ForkCandidate> = Vec::with_capacity(tips.len());
        for (hash, parent) in tips {
            let slot = self.blocks.get(&hash).map(|b| b.slot).unwrap_or(0);
            let cumulative_weight = self.cumulative_weight_cached(&hash, &mut cache);
            candidates.push(ForkCandidate {
                hash,
                slot,
                cumulative_weight,
                parent,
            });
        }
        candidates.sort_by(|a, b| {
            b.cumulative_weight
                .cmp(&a.cumulative_weight)
                .then_with(|| b.slot.cmp(&a.slot))
                .then_with(|| a.hash.cmp(&b.hash))
        });
        candidates
    }

    /// Stats entry for a validator, creating a default one if absent.
    pub fn stats_for(&mut self, name: &str) -> ValidatorStats {
        *self.stats.entry(name.to_string()).or_default()
    }

    /// World state after replaying genesis to the given tip.
    pub fn state_at_tip(&self, tip_hash: &str) -> Result<WorldState, ChainError> {
        let chain = self.chain_from_tip(tip_hash)?;
        let mut state = self.genesis.clone();
        for block in chain.iter().skip(1) {
            state = apply_transactions(&state, &block.transactions)?;
        }
        Ok(state)
    }
}

/// Per-link structural checks used by the full-chain replay.
fn verify_block_link(prev: &Block, cur: &Block) -> Result<(), ChainError> {
    if cur.prev_hash != prev.hash {
        return Err(ChainError::InvalidPrevHash { index: cur.index });
    }
    if cur.slot < prev.slot {
        return Err(ChainError::SlotRegression { index: cur.index });
    }
    Ok(())
}

fn genesis_block(seed: &[u8; 32]) -> Block {
    let mut genesis = Block {
        index: 0,
        prev_hash: GENESIS_PARENT.to_string(),
        slot: 0,
        tick: 0,
        validator: GENESIS_VALIDATOR.to_string(),
        tx_root: tx_root(&[]),
        state_root: state_root(&WorldState::new()),
        poh_hash: poh_hash_hex(seed),
        signature: String::new(),
        hash: String::new(),
        transactions: Vec::new(),
    };
    genesis.hash = hex::encode(genesis.digest());
    genesis
}
