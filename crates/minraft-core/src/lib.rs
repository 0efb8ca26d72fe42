//! # minraft-core
//!
//! why: implement the core raft consensus algorithm in pure, portable rust
//! relations: used by minraft-storage for persistence, driven by a host loop
//! what: node state machine, log window, storage contract, message types
//!
//! the core performs no i/o. the host delivers ticks and inbound messages,
//! then drains a `Ready` bundle: entries to persist, entries to apply,
//! messages to send. persistence must happen before transmission so a crash
//! cannot leak promises the node would not honor on restart.

pub mod errors;
pub mod log;
pub mod message;
pub mod node;
pub mod storage;

pub use errors::{Error, Result};
pub use log::RaftLog;
pub use message::{
    ConfState, Entry, EntryKind, HardState, Message, MessageKind, Snapshot, SnapshotMetadata,
};
pub use node::{Config, NodeState, Progress, RaftNode, Ready, VoteResult};
pub use storage::{MemStorage, Storage};
