//! # errors
//!
//! why: give the consensus core a small error taxonomy returned as values
//! relations: produced by storage.rs and log.rs lookups, surfaced by node.rs
//! what: Error enum, Result alias

use thiserror::Error;

/// errors surfaced by the consensus core
///
/// protocol-normal conditions (stale messages, lost elections) are not
/// errors and are absorbed silently. invariant violations are not errors
/// either: they panic, because they mean the state is corrupt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// the requested index is below the compaction floor
    #[error("log index {0} is compacted")]
    Compacted(u64),

    /// the requested index is beyond the last known entry
    #[error("log index {0} is unavailable")]
    Unavailable(u64),

    /// storage cannot produce a snapshot right now, retry later
    #[error("snapshot is temporarily unavailable")]
    SnapshotTemporarilyUnavailable,

    /// the proposal violated a precondition and was ignored
    #[error("proposal dropped")]
    ProposalDropped,

    /// node construction rejected the supplied config
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
