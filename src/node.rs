//! Node assembly: chain engine, mempool, and persistence wiring.

use std::sync::Arc;

use crate::chain::Blockchain;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::StorageError;
use crate::logger::ChainLogger;
use crate::mempool::Mempool;
use crate::storage::{FileBlockStore, FileSnapshotStore};

/// A fully wired single node. With a data directory configured, the block
/// log is replayed on startup and every accepted block is persisted.
pub struct Node {
    pub chain: Blockchain,
    pub mempool: Mempool,
}

impl Node {
    pub fn new(
        config: AppConfig,
        clock: &dyn Clock,
        logger: Box<dyn ChainLogger>,
    ) -> Result<Self, StorageError> {
        let mut chain = Blockchain::new(config.chain, clock, logger);
        if let Some(dir) = config.data_dir {
            let block_store = Arc::new(FileBlockStore::open(&dir)?);
            let snapshot_store = Arc::new(FileSnapshotStore::open(&dir)?);
            chain.restore_from_storage(block_store.as_ref(), Some(snapshot_store.as_ref()))?;
            chain.set_storage(block_store, snapshot_store);
        }
        Ok(Self {
            chain,
            mempool: Mempool::new(),
        })
    }
}
