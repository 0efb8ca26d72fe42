//! # log
//!
//! why: manage the in-memory window of the replicated log
//! relations: owned by node.rs, recovers from and mirrors storage.rs
//! what: RaftLog window, cursor discipline, conflict checks, compaction
//!
//! the window spans `[start, last_index]` where `start` is a sentinel entry
//! carrying the term of the last compacted index. cursors move only forward:
//!
//! ```text
//! start.....applied....committed....stabled.....last
//! ----|--------------------------------------------|
//!                     log entries
//! ```
//!
//! `committed` may briefly lead `stabled` while a `Ready` is in flight; the
//! full chain holds again once the host acknowledges it via `advance`.

use tracing::debug;

use crate::errors::{Error, Result};
use crate::message::{Entry, Snapshot};
use crate::storage::Storage;

/// the in-memory log window bridged to stable storage
pub struct RaftLog<S: Storage> {
    /// stable entries since the last snapshot; read-only from here
    store: S,

    /// all entries not yet compacted, with the sentinel at position 0
    entries: Vec<Entry>,

    /// compaction floor; index of the sentinel entry
    start: u64,

    /// highest index the host has applied to its state machine
    pub applied: u64,

    /// highest index known to be on stable storage at a quorum
    pub committed: u64,

    /// entries up to here are persisted by storage; above are memory-only
    pub stabled: u64,

    /// incoming snapshot waiting for the host to install, if any
    pub pending_snapshot: Option<Snapshot>,
}

impl<S: Storage> RaftLog<S> {
    /// recover the window from storage: all persisted entries plus the
    /// sentinel at `first_index - 1`
    pub fn new(store: S) -> Result<Self> {
        let (hard_state, _) = store.initial_state()?;
        let first = store.first_index()?;
        let last = store.last_index()?;
        let start = first - 1;

        let mut entries = Vec::with_capacity((last - start + 1) as usize);
        entries.push(Entry {
            index: start,
            term: store.term(start)?,
            ..Entry::default()
        });
        entries.extend(store.entries(first, last + 1)?);

        Ok(Self {
            store,
            entries,
            start,
            applied: start,
            committed: hard_state.commit.max(start),
            stabled: last,
            pending_snapshot: None,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -- queries --

    pub fn first_index(&self) -> u64 {
        self.start + 1
    }

    pub fn last_index(&self) -> u64 {
        self.last_entry().index
    }

    pub fn last_term(&self) -> u64 {
        self.last_entry().term
    }

    fn last_entry(&self) -> &Entry {
        self.entries.last().expect("window always holds the sentinel")
    }

    /// the entry at `index`; the sentinel answers for `start`
    pub fn entry_at(&self, index: u64) -> Result<&Entry> {
        if index == self.start {
            return Ok(&self.entries[0]);
        }
        if index < self.first_index() {
            return Err(Error::Compacted(index));
        }
        if index > self.last_index() {
            return Err(Error::Unavailable(index));
        }
        Ok(&self.entries[(index - self.start) as usize])
    }

    /// term of the entry at `index`
    pub fn term(&self, index: u64) -> Result<u64> {
        self.entry_at(index).map(|e| e.term)
    }

    /// true iff `index` lies in `[first_index, last_index]`
    pub fn contains(&self, index: u64) -> bool {
        self.first_index() <= index && index <= self.last_index()
    }

    /// true iff the log has no entry at `index` or holds one of another term
    pub fn is_conflict(&self, index: u64, term: u64) -> bool {
        !self.contains(index) || self.entries[(index - self.start) as usize].term != term
    }

    /// entries in the inclusive range `[lo, hi]`, clamped into the window
    pub fn slice(&self, lo: u64, hi: u64) -> Vec<Entry> {
        if hi < lo || hi < self.first_index() {
            return Vec::new();
        }
        let lo = lo.max(self.first_index());
        let hi = hi.min(self.last_index());
        if hi < lo {
            return Vec::new();
        }
        self.entries[(lo - self.start) as usize..=(hi - self.start) as usize].to_vec()
    }

    /// all entries above the compaction floor (the sentinel is excluded)
    pub fn all_entries(&self) -> Vec<Entry> {
        self.entries[1..].to_vec()
    }

    /// entries not yet persisted by storage
    pub fn unstable_entries(&self) -> Vec<Entry> {
        if self.stabled == self.last_index() {
            return Vec::new();
        }
        self.entries[(self.stabled - self.start + 1) as usize..].to_vec()
    }

    /// committed but not yet applied entries
    pub fn next_entries(&self) -> Vec<Entry> {
        if self.applied == self.committed {
            return Vec::new();
        }
        assert!(
            self.applied < self.committed,
            "applied {} ran ahead of committed {}",
            self.applied,
            self.committed,
        );
        self.entries[(self.applied - self.start + 1) as usize..=(self.committed - self.start) as usize]
            .to_vec()
    }

    // -- mutations --

    /// blind append; the caller has already resolved conflicts
    pub fn append(&mut self, entries: &[Entry]) -> u64 {
        if let Some(first_new) = entries.first().map(|e| e.index) {
            debug_assert_eq!(
                first_new,
                self.last_index() + 1,
                "append must continue the log",
            );
        }
        self.entries.extend_from_slice(entries);
        self.last_index()
    }

    /// discard entries at `index` and above
    pub fn truncate(&mut self, index: u64) {
        assert!(
            index > self.committed,
            "truncate at {} would discard committed entries ({})",
            index,
            self.committed,
        );
        debug!(index, "truncating log");
        self.entries.truncate((index - self.start) as usize);
        self.stabled = self.stabled.min(self.last_index());
    }

    /// monotone raise of the commit cursor; smaller values are ignored
    pub fn update_commit(&mut self, commit: u64) {
        if commit <= self.committed {
            return;
        }
        assert!(
            commit <= self.last_index(),
            "commit {} beyond last index {}",
            commit,
            self.last_index(),
        );
        self.committed = commit;
    }

    /// reset the window after a snapshot at `(index, term)` was installed
    ///
    /// the snapshot becomes the new sentinel and every cursor is raised to
    /// at least `index`
    pub fn compact_to(&mut self, index: u64, term: u64) {
        debug!(index, term, "compacting log window");
        self.entries.clear();
        self.entries.push(Entry {
            index,
            term,
            ..Entry::default()
        });
        self.start = index;
        self.committed = self.committed.max(index);
        self.applied = self.applied.max(index);
        self.stabled = self.stabled.max(index);
    }

    /// host acknowledged persistence up to `index`
    pub fn stable_to(&mut self, index: u64) {
        assert!(
            index <= self.last_index(),
            "stabled {} beyond last index {}",
            index,
            self.last_index(),
        );
        self.stabled = self.stabled.max(index);
    }

    /// host acknowledged applying entries up to `index`
    pub fn applied_to(&mut self, index: u64) {
        if index == 0 {
            return;
        }
        assert!(
            self.applied <= index && index <= self.committed,
            "applied_to({}) out of range [{}, {}]",
            index,
            self.applied,
            self.committed,
        );
        self.applied = index;
    }
}
