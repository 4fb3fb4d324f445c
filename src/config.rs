//! Chain configuration and protocol constants.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// PROTOCOL CONSTANTS
// ============================================================================

/// Minimum stake required to enter (or remain in) the validator set.
pub const MIN_STAKE: u64 = 10;

/// Stake credited to a leader for each accepted block.
pub const BLOCK_REWARD: u64 = 1;

/// Flat stake deduction charged to the leader for a failed production attempt.
pub const SLASH_PENALTY: u64 = 5;

/// Percentage slash applied for equivocation and chronic missed slots.
pub const SLASH_PERCENT: u64 = 2;

/// Missed slots tolerated before the percentage slash and jailing kick in.
pub const MAX_MISSED_SLOTS: u64 = 3;

/// Slots per epoch for jail bookkeeping.
pub const SLOTS_PER_EPOCH: u64 = 50;

/// Epochs a validator stays excluded from snapshots after being jailed.
pub const JAIL_EPOCHS: u64 = 2;

/// Nominal tick rate of the PoH chain.
pub const TICKS_PER_SECOND: u64 = 50;

/// Ticks advanced per production slot.
pub const TICKS_PER_SLOT: u64 = 20;

/// Parent-hash sentinel carried by the genesis block.
pub const GENESIS_PARENT: &str = "GENESIS";

/// Validator name returned when no leader can be drawn.
pub const GENESIS_VALIDATOR: &str = "genesis";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tunable consensus parameters. Zero-valued size fields fall back to their
/// defaults when the engine is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Deepest reorganization the guard will accept.
    pub max_reorg_depth: usize,
    /// Distance behind the canonical tip at which slots finalize.
    pub finality_slots: u64,
    /// Minimum weight gain for a reorg, as a percentage of active stake.
    pub min_reorg_weight_delta_pct: u64,
    /// Slots per epoch for stake snapshots.
    pub epoch_length: u64,
    /// Upper bound on transactions selected into one block.
    pub max_block_txs: usize,
    /// Seed the PoH chain from `poh_seed` instead of the clock.
    pub deterministic_poh: bool,
    /// Initialization entropy used when `deterministic_poh` is set.
    pub poh_seed: i64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_reorg_depth: 2,
            finality_slots: 2,
            min_reorg_weight_delta_pct: 10,
            epoch_length: SLOTS_PER_EPOCH,
            max_block_txs: 100,
            deterministic_poh: false,
            poh_seed: 0,
        }
    }
}

impl ChainConfig {
    /// Replace zero-valued size fields with their defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.max_reorg_depth == 0 {
            self.max_reorg_depth = defaults.max_reorg_depth;
        }
        if self.finality_slots == 0 {
            self.finality_slots = defaults.finality_slots;
        }
        if self.epoch_length == 0 {
            self.epoch_length = defaults.epoch_length;
        }
        if self.max_block_txs == 0 {
            self.max_block_txs = defaults.max_block_txs;
        }
        self
    }
}

/// Top-level node configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub chain: ChainConfig,
    /// Data directory for block and snapshot persistence. `None` keeps the
    /// node fully in memory.
    pub data_dir: Option<PathBuf>,
}
