//! File-backed storage adapters.
//!
//! Blocks land in an append-only JSON-lines log with a JSON index mapping
//! height to hash; the index is written via temp-file plus atomic rename and
//! rebuilt from the log when missing. Snapshots are one JSON file per epoch.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::error::StorageError;
use crate::storage::{BlockStore, SnapshotStore, StoredSnapshot};

const BLOCKS_FILE: &str = "blocks.jsonl";
const INDEX_FILE: &str = "index.json";
const SNAPSHOT_DIR: &str = "snapshots";

// ============================================================================
// BLOCK STORE
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BlockIndex {
    height_to_hash: HashMap<u64, String>,
    tip_hash: String,
    tip_height: u64,
}

#[derive(Default)]
struct FileStoreInner {
    blocks: HashMap<String, Block>,
    height_to_hash: HashMap<u64, String>,
    tip_hash: String,
    tip_height: u64,
}

/// Append-only block log with an atomically replaced height index.
pub struct FileBlockStore {
    blocks_path: PathBuf,
    index_path: PathBuf,
    inner: RwLock<FileStoreInner>,
}

impl FileBlockStore {
    /// Open (or create) a store under `dir`, loading any existing log and
    /// rebuilding the index from the log when the index file is absent.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() {
            return Err(StorageError::DataDirRequired);
        }
        fs::create_dir_all(dir)?;
        let store = Self {
            blocks_path: dir.join(BLOCKS_FILE),
            index_path: dir.join(INDEX_FILE),
            inner: RwLock::new(FileStoreInner::default()),
        };
        store.load()?;
        Ok(store)
    }

    fn load(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        if self.index_path.exists() {
            let raw = fs::read(&self.index_path)?;
            let index: BlockIndex = serde_json::from_slice(&raw)?;
            inner.height_to_hash = index.height_to_hash;
            inner.tip_hash = index.tip_hash;
            inner.tip_height = index.tip_height;
        }
        if self.blocks_path.exists() {
            let reader = BufReader::new(File::open(&self.blocks_path)?);
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                let block: Block = serde_json::from_str(&line)?;
                inner.blocks.insert(block.hash.clone(), block);
            }
        }
        if inner.height_to_hash.is_empty() && !inner.blocks.is_empty() {
            Self::rebuild_index(&mut inner);
            self.write_index(&inner)?;
        }
        Ok(())
    }

    fn rebuild_index(inner: &mut FileStoreInner) {
        inner.height_to_hash.clear();
        let mut tip_height = 0u64;
        let mut tip_hash = String::new();
        for block in inner.blocks.values() {
            inner.height_to_hash.insert(block.index, block.hash.clone());
            if block.index >= tip_height {
                tip_height = block.index;
                tip_hash = block.hash.clone();
            }
        }
        inner.tip_height = tip_height;
        inner.tip_hash = tip_hash;
    }

    fn append_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.blocks_path)?;
        let mut line = serde_json::to_vec(block)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }

    fn write_index(&self, inner: &FileStoreInner) -> Result<(), StorageError> {
        let index = BlockIndex {
            height_to_hash: inner.height_to_hash.clone(),
            tip_hash: inner.tip_hash.clone(),
            tip_height: inner.tip_height,
        };
        write_json_atomic(&self.index_path, &index)
    }
}

impl BlockStore for FileBlockStore {
    fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        self.append_block(block)?;
        inner.blocks.insert(block.hash.clone(), block.clone());
        inner.height_to_hash.insert(block.index, block.hash.clone());
        if block.index >= inner.tip_height {
            inner.tip_height = block.index;
            inner.tip_hash = block.hash.clone();
        }
        self.write_index(&inner)
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

// ============================================================================
// SNAPSHOT STORE
// ============================================================================

/// One JSON file per epoch under `<dir>/snapshots/`.
pub struct FileSnapshotStore {
    dir: PathBuf,
    lock: RwLock<()>,
}

impl FileSnapshotStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() {
            return Err(StorageError::DataDirRequired);
        }
        let dir = dir.join(SNAPSHOT_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: RwLock::new(()),
        })
    }

    fn epoch_path(&self, epoch: u64) -> PathBuf {
        self.dir.join(format!("epoch_{epoch}.json"))
    }

    fn read_snapshot(path: &Path) -> Result<StoredSnapshot, StorageError> {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save_epoch_snapshot(
        &self,
        epoch: u64,
        state_root: &str,
        validator_set: &HashMap<String, u64>,
    ) -> Result<(), StorageError> {
        let _guard = self.lock.write();
        let snapshot = StoredSnapshot {
            epoch,
            state_root: state_root.to_string(),
            validator_set: validator_set.clone(),
        };
        write_json_atomic(&self.epoch_path(epoch), &snapshot)
    }

    fn load_latest_snapshot(&self) -> Result<Option<StoredSnapshot>, StorageError> {
        let _guard = self.lock.read();
        let mut latest: Option<(u64, PathBuf)> = None;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(epoch) = parse_epoch_file_name(name) else {
                continue;
            };
            if latest.as_ref().map(|(e, _)| epoch >= *e).unwrap_or(true) {
                latest = Some((epoch, entry.path()));
            }
        }
        match latest {
            Some((_, path)) => Ok(Some(Self::read_snapshot(&path)?)),
            None => Ok(None),
        }
    }

    fn load_snapshot_by_epoch(&self, epoch: u64) -> Result<Option<StoredSnapshot>, StorageError> {
        let _guard = self.lock.read();
        let path = self.epoch_path(epoch);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::read_snapshot(&path)?))
    }
}

fn parse_epoch_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("epoch_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Write JSON to a temp file and atomically rename it into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let data = serde_json::to_vec(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(index: u64, hash: &str) -> Block {
        Block {
            index,
            hash: hash.into(),
            prev_hash: if index == 0 { "GENESIS".into() } else { String::new() },
            ..Block::default()
        }
    }

    #[test]
    fn blocks_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileBlockStore::open(dir.path()).unwrap();
            store.save_block(&block(0, "g")).unwrap();
            store.save_block(&block(1, "a")).unwrap();
        }
        let store = FileBlockStore::open(dir.path()).unwrap();
        assert_eq!(store.tip().unwrap().unwrap().hash, "a");
        assert_eq!(store.block_by_height(0).unwrap().unwrap().hash, "g");
        assert_eq!(store.range(0, 1).unwrap().len(), 2);
    }

    #[test]
    fn index_is_rebuilt_from_the_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileBlockStore::open(dir.path()).unwrap();
            store.save_block(&block(0, "g")).unwrap();
            store.save_block(&block(1, "a")).unwrap();
        }
        fs::remove_file(dir.path().join(INDEX_FILE)).unwrap();

        let store = FileBlockStore::open(dir.path()).unwrap();
        assert_eq!(store.tip().unwrap().unwrap().hash, "a");
        assert!(dir.path().join(INDEX_FILE).exists());
    }

    #[test]
    fn missing_heights_error_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlockStore::open(dir.path()).unwrap();
        store.save_block(&block(0, "g")).unwrap();
        store.save_block(&block(2, "b")).unwrap();
        assert!(store.range(0, 2).is_err());
    }

    #[test]
    fn snapshots_round_trip_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path()).unwrap();

        let set: HashMap<String, u64> = [("Alice".to_string(), 100u64)].into();
        store.save_epoch_snapshot(0, "root0", &set).unwrap();
        store.save_epoch_snapshot(3, "root3", &set).unwrap();

        let latest = store.load_latest_snapshot().unwrap().unwrap();
        assert_eq!(latest.epoch, 3);
        assert_eq!(latest.state_root, "root3");

        let by_epoch = store.load_snapshot_by_epoch(0).unwrap().unwrap();
        assert_eq!(by_epoch.state_root, "root0");
        assert_eq!(by_epoch.validator_set["Alice"], 100);

        assert!(store.load_snapshot_by_epoch(9).unwrap().is_none());
    }

    #[test]
    fn empty_dir_has_no_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path()).unwrap();
        assert!(store.load_latest_snapshot().unwrap().is_none());
    }
}
