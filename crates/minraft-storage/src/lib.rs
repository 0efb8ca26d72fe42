//! # minraft-storage
//!
//! why: provide durable persistence for raft state using standard rust fs apis
//! relations: implements the minraft-core Storage trait for host processes
//! what: FileStorage implementation, StorageError, MemStorage re-export
//!
//! layout of a storage directory:
//! - meta.json: hard state, membership, compaction floor, latest snapshot
//! - log.json: entries above the compaction floor
//!
//! both files are written atomically (temp file, fsync, rename) and mirrored
//! in memory, so the read side of the Storage trait never touches the disk.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use minraft_core::{
    ConfState, Entry, Error as RaftError, HardState, Result as RaftResult, Snapshot,
    SnapshotMetadata, Storage,
};

pub use minraft_core::MemStorage;

/// errors from the durable backend itself
///
/// the consensus-facing taxonomy (`Compacted` and friends) lives in
/// minraft-core and is wrapped here unchanged.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt state file: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error(transparent)]
    Raft(#[from] RaftError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// contents of meta.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Meta {
    hard_state: HardState,
    conf_state: ConfState,
    /// last compacted index and its term; entries in log.json start right
    /// above `floor_index`
    floor_index: u64,
    floor_term: u64,
    /// latest snapshot the host saved or installed
    snapshot: Snapshot,
}

struct FileStorageCore {
    dir: PathBuf,
    meta: Meta,
    /// mirror of log.json
    entries: Vec<Entry>,
}

impl FileStorageCore {
    fn first_index(&self) -> u64 {
        self.meta.floor_index + 1
    }

    fn last_index(&self) -> u64 {
        self.meta.floor_index + self.entries.len() as u64
    }

    fn term(&self, index: u64) -> RaftResult<u64> {
        if index == self.meta.floor_index {
            return Ok(self.meta.floor_term);
        }
        if index < self.meta.floor_index {
            return Err(RaftError::Compacted(index));
        }
        if index > self.last_index() {
            return Err(RaftError::Unavailable(index));
        }
        Ok(self.entries[(index - self.first_index()) as usize].term)
    }

    fn persist_meta(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.meta)?;
        atomic_write(&self.dir, "meta.json", "meta.tmp", json.as_bytes())
    }

    fn persist_log(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        atomic_write(&self.dir, "log.json", "log.tmp", json.as_bytes())
    }
}

/// atomic write: write to a temp file, sync, then rename into place
fn atomic_write(dir: &Path, name: &str, temp_name: &str, bytes: &[u8]) -> Result<()> {
    let temp_path = dir.join(temp_name);
    let mut file = File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, dir.join(name))?;
    Ok(())
}

/// file-backed storage for one raft node
///
/// clonable handle; all clones share one underlying store, so the host can
/// keep writing while the node reads through the Storage trait
#[derive(Clone)]
pub struct FileStorage {
    core: Arc<RwLock<FileStorageCore>>,
}

impl FileStorage {
    /// open (or create) a storage directory and load its state
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let meta_path = dir.join("meta.json");
        let meta: Meta = if meta_path.exists() {
            serde_json::from_str(&fs::read_to_string(&meta_path)?)?
        } else {
            Meta::default()
        };

        let log_path = dir.join("log.json");
        let entries: Vec<Entry> = if log_path.exists() {
            serde_json::from_str(&fs::read_to_string(&log_path)?)?
        } else {
            Vec::new()
        };

        debug!(dir = %dir.display(), entries = entries.len(), "opened storage");
        Ok(Self {
            core: Arc::new(RwLock::new(FileStorageCore { dir, meta, entries })),
        })
    }

    /// persist a new durable hard state
    pub fn set_hard_state(&self, hard_state: HardState) -> Result<()> {
        let mut core = self.core.write();
        core.meta.hard_state = hard_state;
        core.persist_meta()
    }

    /// persist new entries, truncating any overlapping suffix first
    pub fn append(&self, entries: &[Entry]) -> Result<()> {
        let Some(first_new) = entries.first().map(|e| e.index) else {
            return Ok(());
        };
        let mut core = self.core.write();
        if first_new < core.first_index() {
            return Err(RaftError::Compacted(first_new).into());
        }
        assert!(
            first_new <= core.last_index() + 1,
            "append would leave a gap: first new index {} after last index {}",
            first_new,
            core.last_index(),
        );
        let first = core.first_index();
        core.entries.truncate((first_new - first) as usize);
        core.entries.extend_from_slice(entries);
        core.persist_log()
    }

    /// discard persisted entries at and below `index`
    ///
    /// the host is expected to have saved a snapshot covering the dropped
    /// prefix via [`FileStorage::create_snapshot`] first
    pub fn compact(&self, index: u64) -> Result<()> {
        let mut core = self.core.write();
        if index <= core.meta.floor_index {
            return Err(RaftError::Compacted(index).into());
        }
        if index > core.last_index() {
            return Err(RaftError::Unavailable(index).into());
        }
        let term = core.term(index)?;
        let drop = (index - core.meta.floor_index) as usize;
        core.entries.drain(..drop);
        core.meta.floor_index = index;
        core.meta.floor_term = term;
        core.persist_meta()?;
        core.persist_log()
    }

    /// record a host-produced snapshot of the application state at `index`
    pub fn create_snapshot(&self, index: u64, data: Vec<u8>) -> Result<Snapshot> {
        let mut core = self.core.write();
        let term = core.term(index)?;
        let snapshot = Snapshot {
            metadata: SnapshotMetadata {
                index,
                term,
                conf_state: core.meta.conf_state.clone(),
            },
            data,
        };
        core.meta.snapshot = snapshot.clone();
        core.persist_meta()?;
        Ok(snapshot)
    }

    /// install a snapshot received from the leader, replacing the log
    pub fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut core = self.core.write();
        let meta = &snapshot.metadata;
        if meta.index <= core.meta.floor_index {
            return Err(RaftError::Compacted(meta.index).into());
        }
        core.meta.floor_index = meta.index;
        core.meta.floor_term = meta.term;
        core.meta.conf_state = meta.conf_state.clone();
        core.meta.snapshot = snapshot.clone();
        core.meta.hard_state.term = core.meta.hard_state.term.max(meta.term);
        core.meta.hard_state.commit = meta.index;
        core.entries.clear();
        core.persist_meta()?;
        core.persist_log()
    }

    /// remove all persisted state
    pub fn clear(&self) -> Result<()> {
        let mut core = self.core.write();
        let _ = fs::remove_file(core.dir.join("meta.json"));
        let _ = fs::remove_file(core.dir.join("log.json"));
        core.meta = Meta::default();
        core.entries.clear();
        Ok(())
    }
}

impl Storage for FileStorage {
    fn initial_state(&self) -> RaftResult<(HardState, ConfState)> {
        let core = self.core.read();
        Ok((core.meta.hard_state, core.meta.conf_state.clone()))
    }

    fn first_index(&self) -> RaftResult<u64> {
        Ok(self.core.read().first_index())
    }

    fn last_index(&self) -> RaftResult<u64> {
        Ok(self.core.read().last_index())
    }

    fn term(&self, index: u64) -> RaftResult<u64> {
        self.core.read().term(index)
    }

    fn entries(&self, lo: u64, hi: u64) -> RaftResult<Vec<Entry>> {
        if lo >= hi {
            return Ok(Vec::new());
        }
        let core = self.core.read();
        if lo < core.first_index() {
            return Err(RaftError::Compacted(lo));
        }
        if hi > core.last_index() + 1 {
            return Err(RaftError::Unavailable(hi - 1));
        }
        let first = core.first_index();
        Ok(core.entries[(lo - first) as usize..(hi - first) as usize].to_vec())
    }

    fn snapshot(&self) -> RaftResult<Snapshot> {
        let core = self.core.read();
        if core.meta.snapshot.metadata.index == 0 {
            // the host has not produced one yet; the leader will retry
            return Err(RaftError::SnapshotTemporarilyUnavailable);
        }
        Ok(core.meta.snapshot.clone())
    }
}
