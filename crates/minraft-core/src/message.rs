//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: used by node.rs for dispatch, serialized by the host transport
//! what: Message envelope, MessageKind union, Entry, HardState, Snapshot

use serde::{Deserialize, Serialize};

/// what a log entry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EntryKind {
    /// an opaque command for the application state machine
    #[default]
    Normal,
    /// a cluster membership change; at most one may be pending at a time
    ConfChange,
}

/// a single entry in the replicated log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// the term when this entry was created
    pub term: u64,
    /// the position of this entry in the log (1-indexed)
    pub index: u64,
    pub kind: EntryKind,
    /// the command to be applied to the state machine
    pub data: Vec<u8>,
}

impl Entry {
    /// create a new normal entry
    pub fn new(term: u64, index: u64, data: Vec<u8>) -> Self {
        Self {
            term,
            index,
            kind: EntryKind::Normal,
            data,
        }
    }
}

/// the durable part of a node's state
///
/// must be persisted before any message that reflects it is sent.
/// `commit` never decreases across persisted states of the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HardState {
    pub term: u64,
    /// node id that received our vote in `term`, if any
    pub vote: Option<u64>,
    pub commit: u64,
}

/// cluster membership as known at the last restart or snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfState {
    pub peers: Vec<u64>,
}

/// where a snapshot cuts the log
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// last log index included in the snapshot
    pub index: u64,
    /// term of that index
    pub term: u64,
    pub conf_state: ConfState,
}

/// a point-in-time image of the application state machine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub data: Vec<u8>,
}

/// all possible raft messages between nodes
///
/// the envelope fields live on [`Message`]; this union only carries the
/// per-kind payload. `Hup` and `Beat` are local self-messages and never
/// cross the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// start an election (local, term 0)
    Hup,
    /// broadcast a heartbeat round (local, term 0)
    Beat,
    /// host asks the leader to append new entries
    Propose { entries: Vec<Entry> },
    /// replicate log entries; `index`/`log_term` describe the entry just
    /// before `entries`
    Append {
        index: u64,
        log_term: u64,
        entries: Vec<Entry>,
        commit: u64,
    },
    /// follower's answer; on accept, `index` is the last index it now holds
    AppendResponse { index: u64, reject: bool },
    /// candidate asks for a vote; `index`/`log_term` describe its last entry
    RequestVote { index: u64, log_term: u64 },
    RequestVoteResponse { reject: bool },
    /// leader liveness probe; `commit` is clamped to what the peer holds
    Heartbeat { commit: u64 },
    HeartbeatResponse,
    /// leader ships a snapshot to a follower whose next entry is compacted
    Snapshot { snapshot: Snapshot },
}

impl MessageKind {
    /// local messages carry term 0 and bypass the term gate
    pub fn is_local(&self) -> bool {
        matches!(self, MessageKind::Hup | MessageKind::Beat)
    }

    /// messages only a current leader originates
    pub fn is_from_leader(&self) -> bool {
        matches!(
            self,
            MessageKind::Append { .. } | MessageKind::Heartbeat { .. } | MessageKind::Snapshot { .. }
        )
    }
}

/// one raft message with its routing envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub from: u64,
    pub to: u64,
    /// sender's term; 0 marks a local or host-originated message
    pub term: u64,
    pub kind: MessageKind,
}

impl Message {
    /// local self-message that starts an election
    pub fn hup(id: u64) -> Self {
        Self {
            from: id,
            to: id,
            term: 0,
            kind: MessageKind::Hup,
        }
    }

    /// local self-message that triggers a heartbeat broadcast
    pub fn beat(id: u64) -> Self {
        Self {
            from: id,
            to: id,
            term: 0,
            kind: MessageKind::Beat,
        }
    }

    /// host-built proposal addressed to `to`
    pub fn propose(to: u64, entries: Vec<Entry>) -> Self {
        Self {
            from: 0,
            to,
            term: 0,
            kind: MessageKind::Propose { entries },
        }
    }
}
