//! Storage collaborators.
//!
//! The engine talks to storage through two narrow ports: an append/lookup
//! block store and a per-epoch snapshot store. Failures here never affect
//! consensus; the engine logs and moves on.

pub mod file;

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::error::StorageError;

pub use file::{FileBlockStore, FileSnapshotStore};

/// Block persistence port.
pub trait BlockStore: Send + Sync {
    fn save_block(&self, block: &Block) -> Result<(), StorageError>;
    fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StorageError>;
    fn block_by_height(&self, height: u64) -> Result<Option<Block>, StorageError>;
    fn tip(&self) -> Result<Option<Block>, StorageError>;
    /// Blocks from `start` to `end` inclusive, height-ordered.
    fn range(&self, start: u64, end: u64) -> Result<Vec<Block>, StorageError>;
}

/// A persisted epoch snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub epoch: u64,
    pub state_root: String,
    pub validator_set: HashMap<String, u64>,
}

/// Epoch snapshot persistence port.
pub trait SnapshotStore: Send + Sync {
    fn save_epoch_snapshot(
        &self,
        epoch: u64,
        state_root: &str,
        validator_set: &HashMap<String, u64>,
    ) -> Result<(), StorageError>;
    fn load_latest_snapshot(&self) -> Result<Option<StoredSnapshot>, StorageError>;
    fn load_snapshot_by_epoch(&self, epoch: u64) -> Result<Option<StoredSnapshot>, StorageError>;
}

/// In-memory block store for tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryBlockStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    blocks: HashMap<String, Block>,
    height_to_hash: HashMap<u64, String>,
    tip_hash: String,
    tip_height: u64,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryBlockStore {
    fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        inner.blocks.insert(block.hash.clone(), block.clone());
        inner.height_to_hash.insert(block.index, block.hash.clone());
        if block.index >= inner.tip_height {
            inner.tip_height = block.index;
            inner.tip_hash = block.hash.clone();
        }
        Ok(())
    }

    fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StorageError> {
        Ok(self.inner.read().blocks.get(hash).cloned())
    }

    fn block_by_height(&self, height: u64) -> Result<Option<Block>, StorageError> {
        let inner = self.inner.read();
        Ok(inner
            .height_to_hash
            .get(&height)
            .and_then(|hash| inner.blocks.get(hash))
            .cloned())
    }

    fn tip(&self) -> Result<Option<Block>, StorageError> {
        let inner = self.inner.read();
        if inner.tip_hash.is_empty() {
            return Ok(None);
        }
        Ok(inner.blocks.get(&inner.tip_hash).cloned())
    }

    fn range(&self, start: u64, end: u64) -> Result<Vec<Block>, StorageError> {
        if end < start {
            return Ok(Vec::new());
        }
        let inner = self.inner.read();
        let mut out = Vec::with_capacity((end - start + 1) as usize);
        for height in start..=end {
            let hash = inner
                .height_to_hash
                .get(&height)
                .ok_or(StorageError::MissingHeight(height))?;
            let block = inner
                .blocks
                .get(hash)
                .ok_or_else(|| StorageError::MissingBlock(hash.clone()))?;
            out.push(block.clone());
        }
        Ok(out)
    }
}
