//! Error taxonomy for the chain engine, mempool, and storage adapters.

use thiserror::Error;

use crate::chain::EquivocationProof;

/// Failures surfaced by block production, acceptance, and verification.
///
/// During production every validation failure also costs the named leader a
/// flat `SLASH_PENALTY` before the error is returned; equivocation is the one
/// case where the offending block is still inserted so the evidence survives.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("no validators available")]
    NoValidators,

    #[error("poh not initialized")]
    PohUninitialized,

    #[error("unknown parent hash")]
    UnknownParent,

    #[error("empty chain")]
    EmptyChain,

    #[error("invalid transaction signature at index {index}")]
    InvalidTxSignature { index: usize },

    #[error("invalid amount at index {index}")]
    InvalidAmount { index: usize },

    #[error("missing sender at index {index}")]
    MissingSender { index: usize },

    #[error("insufficient balance at index {index}")]
    InsufficientBalance { index: usize },

    #[error("bad nonce at index {index}")]
    BadNonce { index: usize },

    #[error("invalid prev hash for block {index}")]
    InvalidPrevHash { index: u64 },

    #[error("slot regressed at block {index}")]
    SlotRegression { index: u64 },

    #[error("tick not increasing at block {index}")]
    TickNotIncreasing { index: u64 },

    #[error("slot mismatch at block {index}")]
    SlotMismatch { index: u64 },

    #[error("invalid poh hash at block {index}")]
    InvalidPohHash { index: u64 },

    #[error("invalid hash at block {index}")]
    InvalidBlockHash { index: u64 },

    #[error("missing epoch snapshot for slot {slot}")]
    MissingSnapshot { slot: u64 },

    #[error("wrong leader at slot {slot}")]
    WrongLeader { slot: u64 },

    #[error("unknown validator {name}")]
    UnknownValidator { name: String },

    #[error("missing validator signing key")]
    MissingSigningKey,

    #[error("invalid block signature")]
    InvalidBlockSignature,

    #[error("invalid tx root at block {index}")]
    InvalidTxRoot { index: u64 },

    #[error("invalid state root at block {index}")]
    InvalidStateRoot { index: u64 },

    #[error("double produce at slot {slot}")]
    DoubleProduce { slot: u64 },

    #[error("equivocation detected at slot {} by {}", .proof.slot, .proof.validator)]
    Equivocation { proof: EquivocationProof },

    // Registry failures.
    #[error("validator name is required")]
    ValidatorNameRequired,

    #[error("stake must be positive")]
    StakeNotPositive,

    #[error("validator pubkey is required")]
    PubkeyRequired,

    #[error("stake below minimum")]
    StakeBelowMinimum,

    #[error("validator not found")]
    ValidatorNotFound,

    #[error("unstake exceeds stake")]
    UnstakeExceedsStake,

    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Failures surfaced by mempool admission.
#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("missing tx hash")]
    MissingHash,

    #[error("duplicate tx")]
    Duplicate,

    #[error(transparent)]
    Invalid(#[from] ChainError),
}

/// Failures surfaced by the storage collaborators.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("data dir required")]
    DataDirRequired,

    #[error("missing block at height {0}")]
    MissingHeight(u64),

    #[error("missing block {0}")]
    MissingBlock(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
