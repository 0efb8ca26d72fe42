//! # storage
//!
//! why: define the stable-storage contract the log window is bridged to
//! relations: read by log.rs on recovery, implemented by minraft-storage
//! what: Storage trait, MemStorage in-memory implementation
//!
//! the core only ever reads through this trait. writes (persisting entries
//! and hard state out of a `Ready`) go through the concrete storage type the
//! host owns, which is why `MemStorage` is a cheaply clonable handle: host
//! and node can look at the same store.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::{Error, Result};
use crate::message::{ConfState, Entry, HardState, Snapshot, SnapshotMetadata};

/// contract for stable storage of raft state
///
/// indices below `first_index` are compacted into a snapshot; `term` must
/// still answer for `first_index - 1` with the snapshot's last included
/// term. all methods are synchronous reads; temporary failure is signaled
/// by return value, never by blocking.
pub trait Storage {
    /// the durable `(term, vote, commit)` and membership at last restart
    fn initial_state(&self) -> Result<(HardState, ConfState)>;

    /// smallest index still retrievable
    fn first_index(&self) -> Result<u64>;

    /// largest persisted index
    fn last_index(&self) -> Result<u64>;

    /// term of the entry at `index`
    ///
    /// fails with `Compacted` below `first_index - 1` and `Unavailable`
    /// above `last_index`
    fn term(&self, index: u64) -> Result<u64>;

    /// persisted entries in the half-open range `[lo, hi)`
    fn entries(&self, lo: u64, hi: u64) -> Result<Vec<Entry>>;

    /// the latest snapshot; may fail with `SnapshotTemporarilyUnavailable`
    /// to tell the caller to retry later
    fn snapshot(&self) -> Result<Snapshot>;
}

#[derive(Default)]
struct MemStorageCore {
    hard_state: HardState,
    conf_state: ConfState,
    /// compaction floor; `entries` start right above `snapshot_metadata.index`
    snapshot_metadata: SnapshotMetadata,
    entries: Vec<Entry>,
    /// test hook: make `snapshot()` report temporary unavailability
    snapshot_unavailable: bool,
}

impl MemStorageCore {
    fn first_index(&self) -> u64 {
        self.snapshot_metadata.index + 1
    }

    fn last_index(&self) -> u64 {
        self.snapshot_metadata.index + self.entries.len() as u64
    }

    fn term(&self, index: u64) -> Result<u64> {
        if index == self.snapshot_metadata.index {
            return Ok(self.snapshot_metadata.term);
        }
        if index < self.snapshot_metadata.index {
            return Err(Error::Compacted(index));
        }
        if index > self.last_index() {
            return Err(Error::Unavailable(index));
        }
        Ok(self.entries[(index - self.first_index()) as usize].term)
    }
}

/// in-memory storage, used by tests and as the model for real backends
///
/// clonable handle; all clones share one underlying store
#[derive(Clone, Default)]
pub struct MemStorage {
    core: Arc<RwLock<MemStorageCore>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// a store for a fresh cluster with the given membership
    pub fn with_conf_state(peers: Vec<u64>) -> Self {
        let store = Self::new();
        store.core.write().conf_state = ConfState { peers };
        store
    }

    /// record a new durable hard state
    pub fn set_hard_state(&self, hard_state: HardState) {
        self.core.write().hard_state = hard_state;
    }

    /// mark entries up to `index` committed in the durable hard state
    pub fn commit_to(&self, index: u64) -> Result<()> {
        let mut core = self.core.write();
        if index > core.last_index() {
            return Err(Error::Unavailable(index));
        }
        core.hard_state.commit = core.hard_state.commit.max(index);
        Ok(())
    }

    /// persist new entries, truncating any overlapping suffix first
    pub fn append(&self, entries: &[Entry]) -> Result<()> {
        let Some(first_new) = entries.first().map(|e| e.index) else {
            return Ok(());
        };
        let mut core = self.core.write();
        if first_new < core.first_index() {
            return Err(Error::Compacted(first_new));
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
        Ok(())
    }

    /// discard entries at and below `index`, keeping its term as the new floor
    pub fn compact(&self, index: u64) -> Result<()> {
        let mut core = self.core.write();
        if index <= core.snapshot_metadata.index {
            return Err(Error::Compacted(index));
        }
        if index > core.last_index() {
            return Err(Error::Unavailable(index));
        }
        let term = core.term(index)?;
        let drop = (index - core.snapshot_metadata.index) as usize;
        core.entries.drain(..drop);
        core.snapshot_metadata.index = index;
        core.snapshot_metadata.term = term;
        Ok(())
    }

    /// replace the store contents with an installed snapshot
    pub fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut core = self.core.write();
        if snapshot.metadata.index <= core.snapshot_metadata.index {
            return Err(Error::Compacted(snapshot.metadata.index));
        }
        core.snapshot_metadata = snapshot.metadata.clone();
        core.conf_state = snapshot.metadata.conf_state.clone();
        core.entries.clear();
        core.hard_state.term = core.hard_state.term.max(snapshot.metadata.term);
        core.hard_state.commit = snapshot.metadata.index;
        Ok(())
    }

    /// test hook for the snapshot retry path
    pub fn set_snapshot_unavailable(&self, unavailable: bool) {
        self.core.write().snapshot_unavailable = unavailable;
    }
}

impl Storage for MemStorage {
    fn initial_state(&self) -> Result<(HardState, ConfState)> {
        let core = self.core.read();
        Ok((core.hard_state, core.conf_state.clone()))
    }

    fn first_index(&self) -> Result<u64> {
        Ok(self.core.read().first_index())
    }

    fn last_index(&self) -> Result<u64> {
        Ok(self.core.read().last_index())
    }

    fn term(&self, index: u64) -> Result<u64> {
        self.core.read().term(index)
    }

    fn entries(&self, lo: u64, hi: u64) -> Result<Vec<Entry>> {
        if lo >= hi {
            return Ok(Vec::new());
        }
        let core = self.core.read();
        if lo < core.first_index() {
            return Err(Error::Compacted(lo));
        }
        if hi > core.last_index() + 1 {
            return Err(Error::Unavailable(hi - 1));
        }
        let first = core.first_index();
        Ok(core.entries[(lo - first) as usize..(hi - first) as usize].to_vec())
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let core = self.core.read();
        if core.snapshot_unavailable {
            return Err(Error::SnapshotTemporarilyUnavailable);
        }
        let index = core.hard_state.commit.max(core.snapshot_metadata.index);
        Ok(Snapshot {
            metadata: SnapshotMetadata {
                index,
                term: core.term(index)?,
                conf_state: core.conf_state.clone(),
            },
            data: Vec::new(),
        })
    }
}
