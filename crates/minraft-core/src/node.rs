//! # node
//!
//! why: define the raft node state machine and state transitions
//! relations: uses message.rs for rpc types, log.rs for entry management
//! what: NodeState, Config, Progress, RaftNode, tick/step/ready entry points
//!
//! the node is strictly single-threaded: the host serializes every call to
//! `tick`, `step` and `ready`. timers are logical and counted in ticks.

use std::collections::HashMap;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::errors::{Error, Result};
use crate::log::RaftLog;
use crate::message::{Entry, EntryKind, HardState, Message, MessageKind, Snapshot};
use crate::storage::Storage;

/// the three possible states a raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// passive state - listens for heartbeats, votes when asked
    Follower,
    /// transitional state - requesting votes to become leader
    Candidate,
    /// active state - manages log replication, sends heartbeats
    Leader,
}

impl Default for NodeState {
    fn default() -> Self {
        Self::Follower
    }
}

/// parameters to start a raft node (timeouts are counted in ticks)
#[derive(Debug, Clone)]
pub struct Config {
    /// unique identifier for this node, cannot be 0
    pub id: u64,
    /// ids of all cluster nodes including self; set only on a fresh
    /// cluster, a restarting node recovers membership from storage
    pub peers: Vec<u64>,
    /// ticks a follower waits without leader contact before campaigning;
    /// must be greater than `heartbeat_tick`
    pub election_tick: usize,
    /// ticks between leader heartbeats
    pub heartbeat_tick: usize,
    /// last applied index, set only on restart so committed entries are
    /// not handed to the application twice
    pub applied: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: 0,
            peers: Vec::new(),
            election_tick: 10,
            heartbeat_tick: 1,
            applied: 0,
        }
    }
}

impl Config {
    pub fn new(id: u64, peers: Vec<u64>) -> Self {
        Self {
            id,
            peers,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(Error::InvalidConfig("id cannot be zero".into()));
        }
        if self.heartbeat_tick == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat tick must be greater than 0".into(),
            ));
        }
        if self.election_tick <= self.heartbeat_tick {
            return Err(Error::InvalidConfig(
                "election tick must be greater than heartbeat tick".into(),
            ));
        }
        Ok(())
    }
}

/// a follower's replication state in the leader's view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// highest index known to be replicated on the peer
    pub matched: u64,
    /// index of the next entry to send
    pub next: u64,
}

impl Progress {
    /// raise matched/next from a successful append response
    fn maybe_update(&mut self, index: u64) {
        if index > self.matched {
            self.matched = index;
        }
        self.next = self.next.max(self.matched + 1);
    }

    /// back next off after a rejected append
    fn back_off(&mut self) {
        self.next = self.next.saturating_sub(1).max(self.matched + 1);
    }
}

/// outcome of tallying an election
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteResult {
    Won,
    Lost,
    Pending,
}

/// outputs of one step/tick that the host must persist, apply and send
///
/// the host persists `hard_state` and `entries` (and installs `snapshot`)
/// before releasing `messages` to the network, applies
/// `committed_entries` to its state machine, then calls
/// [`RaftNode::advance`].
#[derive(Debug, Default)]
pub struct Ready {
    /// new durable state, present iff term/vote/commit changed
    pub hard_state: Option<HardState>,
    /// entries not yet on stable storage
    pub entries: Vec<Entry>,
    /// entries ready to be applied to the application state machine
    pub committed_entries: Vec<Entry>,
    /// outbound messages in causal order
    pub messages: Vec<Message>,
    /// snapshot waiting to be installed into storage, if any
    pub snapshot: Option<Snapshot>,
}

impl Ready {
    pub fn is_empty(&self) -> bool {
        self.hard_state.is_none()
            && self.entries.is_empty()
            && self.committed_entries.is_empty()
            && self.messages.is_empty()
            && self.snapshot.is_none()
    }
}

/// a single raft node in the cluster
///
/// implements the raft consensus algorithm including:
/// - leader election with randomized timeouts
/// - log replication with consistency checks
/// - commit index management
pub struct RaftNode<S: Storage> {
    // -- persistent state (must survive restarts) --
    /// unique identifier for this node
    pub id: u64,
    /// current term number (monotonically increasing)
    pub term: u64,
    /// node id that received our vote in the current term, if any
    pub vote: Option<u64>,
    /// the replicated log window
    pub raft_log: RaftLog<S>,

    // -- volatile state --
    /// current state (follower, candidate, or leader)
    pub state: NodeState,
    /// the known leader of the current term, if any
    pub lead: Option<u64>,
    /// all node ids in the cluster, including self
    peers: Vec<u64>,
    /// replication progress per peer; meaningful only while leader
    progresses: HashMap<u64, Progress>,
    /// votes received in the current election
    votes: HashMap<u64, bool>,
    /// outbound messages waiting for the host to drain
    msgs: Vec<Message>,

    // -- timers (logical, in ticks) --
    heartbeat_timeout: usize,
    /// configured election timeout baseline
    election_tick: usize,
    /// current randomized timeout in `[election_tick, 2 * election_tick - 1]`,
    /// redrawn on every timer reset
    election_timeout: usize,
    heartbeat_elapsed: usize,
    election_elapsed: usize,
    rng: ChaCha8Rng,

    // -- extension points --
    /// target of an in-flight leader transfer, if any
    lead_transferee: Option<u64>,
    /// index of the latest pending (unapplied) conf change entry
    pending_conf_index: u64,

    /// last hard state the host acknowledged persisting
    prev_hard_state: HardState,
}

impl<S: Storage> RaftNode<S> {
    /// create a node from config and storage, recovering persisted state
    pub fn new(config: &Config, store: S) -> Result<Self> {
        config.validate()?;

        let raft_log = RaftLog::new(store)?;
        let (hard_state, conf_state) = raft_log.store().initial_state()?;
        let peers = if config.peers.is_empty() {
            conf_state.peers
        } else {
            config.peers.clone()
        };
        if !peers.contains(&config.id) {
            return Err(Error::InvalidConfig(format!(
                "peers must include the local id {}",
                config.id
            )));
        }

        let mut node = Self {
            id: config.id,
            term: hard_state.term,
            vote: hard_state.vote,
            raft_log,
            state: NodeState::Follower,
            lead: None,
            progresses: peers.iter().map(|&p| (p, Progress::default())).collect(),
            peers,
            votes: HashMap::new(),
            msgs: Vec::new(),
            heartbeat_timeout: config.heartbeat_tick,
            election_tick: config.election_tick,
            election_timeout: config.election_tick,
            heartbeat_elapsed: 0,
            election_elapsed: 0,
            rng: ChaCha8Rng::seed_from_u64(config.id),
            lead_transferee: None,
            pending_conf_index: 0,
            prev_hard_state: hard_state,
        };
        if config.applied > 0 {
            node.raft_log.applied_to(config.applied);
        }
        node.become_follower(node.term, None);
        Ok(node)
    }

    // -- small queries --

    pub fn peers(&self) -> &[u64] {
        &self.peers
    }

    /// the leader's view of one peer's replication state
    pub fn progress(&self, id: u64) -> Option<&Progress> {
        self.progresses.get(&id)
    }

    /// number of nodes needed for quorum (majority)
    pub fn quorum_size(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    /// current randomized election timeout in ticks
    pub fn election_timeout(&self) -> usize {
        self.election_timeout
    }

    /// the durable part of the current state
    pub fn hard_state(&self) -> HardState {
        HardState {
            term: self.term,
            vote: self.vote,
            commit: self.raft_log.committed,
        }
    }

    fn peer_ids(&self) -> Vec<u64> {
        self.peers.iter().copied().filter(|&p| p != self.id).collect()
    }

    // -- state transitions --

    /// clear per-term volatile state; the vote survives iff the term does
    fn reset(&mut self, term: u64) {
        if self.term != term {
            self.term = term;
            self.vote = None;
        }
        self.lead = None;
        self.votes.clear();
        self.lead_transferee = None;
        self.heartbeat_elapsed = 0;
        self.reset_election_timer();
    }

    /// step down (or start out) as follower at `term`
    pub fn become_follower(&mut self, term: u64, lead: Option<u64>) {
        self.reset(term);
        self.state = NodeState::Follower;
        self.lead = lead;
        if self.term != 0 {
            info!(id = self.id, term = self.term, lead = ?lead, "became follower");
        }
    }

    /// start campaigning: bump the term and vote for ourselves
    pub fn become_candidate(&mut self) {
        assert_ne!(
            self.state,
            NodeState::Leader,
            "invalid transition leader -> candidate"
        );
        self.reset(self.term + 1);
        self.state = NodeState::Candidate;
        self.vote = Some(self.id);
        self.votes.insert(self.id, true);
        info!(id = self.id, term = self.term, "became candidate");
    }

    /// take leadership of the current term
    ///
    /// only a candidate holding its own vote may be promoted
    pub fn become_leader(&mut self) {
        if self.state != NodeState::Candidate || self.vote.is_none() {
            panic!(
                "become_leader from {:?} with vote {:?}",
                self.state, self.vote
            );
        }
        self.reset(self.term);
        self.state = NodeState::Leader;
        self.lead = Some(self.id);
        let next = self.raft_log.last_index() + 1;
        for progress in self.progresses.values_mut() {
            *progress = Progress { matched: 0, next };
        }
        info!(id = self.id, term = self.term, "became leader");
        // a no-op entry stakes out the new term in the log
        self.leader_append_entries(vec![Entry::default()]);
        self.bcast_append();
    }

    // -- tick-driven timers --

    /// advance the logical clock by one tick
    pub fn tick(&mut self) {
        self.heartbeat_elapsed += 1;
        self.election_elapsed += 1;

        if self.state == NodeState::Leader {
            if self.heartbeat_elapsed >= self.heartbeat_timeout {
                // local messages cannot fail
                let _ = self.step(Message::beat(self.id));
            }
            return;
        }
        if self.election_elapsed >= self.election_timeout {
            let _ = self.step(Message::hup(self.id));
        }
    }

    fn reset_election_timer(&mut self) {
        self.election_elapsed = 0;
        self.election_timeout = self.election_tick + self.rng.gen_range(0..self.election_tick);
    }

    // -- step: the single message entry point --

    /// process one inbound message, local or remote
    ///
    /// stale messages are dropped silently; a higher term demotes us first.
    /// the only error a well-formed message can produce is
    /// `ProposalDropped`.
    pub fn step(&mut self, m: Message) -> Result<()> {
        if m.term == 0 {
            // local or host-originated message, no term gate
        } else if m.term < self.term {
            debug!(
                id = self.id,
                term = self.term,
                msg_term = m.term,
                from = m.from,
                "dropping stale message"
            );
            return Ok(());
        } else if m.term > self.term {
            // only a message from an established leader names one
            let lead = m.kind.is_from_leader().then_some(m.from);
            self.become_follower(m.term, lead);
        }

        let from = m.from;
        if matches!(m.kind, MessageKind::Hup) {
            self.hup();
            return Ok(());
        }
        match self.state {
            NodeState::Follower => self.step_follower(from, m.kind),
            NodeState::Candidate => self.step_candidate(from, m.kind),
            NodeState::Leader => self.step_leader(from, m.kind),
        }
    }

    fn step_follower(&mut self, from: u64, kind: MessageKind) -> Result<()> {
        match kind {
            // forwarding proposals to the leader is a host concern
            MessageKind::Propose { .. } => Err(Error::ProposalDropped),
            MessageKind::RequestVote { index, log_term } => {
                self.handle_request_vote(from, index, log_term);
                Ok(())
            }
            MessageKind::Append {
                index,
                log_term,
                entries,
                commit,
            } => {
                self.handle_append(from, index, log_term, entries, commit);
                Ok(())
            }
            MessageKind::Heartbeat { commit } => {
                self.handle_heartbeat(from, commit);
                Ok(())
            }
            MessageKind::Snapshot { snapshot } => {
                self.handle_snapshot(from, snapshot);
                Ok(())
            }
            // answers to a role we do not hold; protocol-normal to ignore
            MessageKind::Hup
            | MessageKind::Beat
            | MessageKind::AppendResponse { .. }
            | MessageKind::RequestVoteResponse { .. }
            | MessageKind::HeartbeatResponse => Ok(()),
        }
    }

    fn step_candidate(&mut self, from: u64, kind: MessageKind) -> Result<()> {
        match kind {
            MessageKind::Propose { .. } => Err(Error::ProposalDropped),
            MessageKind::RequestVote { index, log_term } => {
                self.handle_request_vote(from, index, log_term);
                Ok(())
            }
            // a leader of our term exists; fall in line before handling
            MessageKind::Append {
                index,
                log_term,
                entries,
                commit,
            } => {
                self.become_follower(self.term, Some(from));
                self.handle_append(from, index, log_term, entries, commit);
                Ok(())
            }
            MessageKind::Heartbeat { commit } => {
                self.become_follower(self.term, Some(from));
                self.handle_heartbeat(from, commit);
                Ok(())
            }
            MessageKind::Snapshot { snapshot } => {
                self.become_follower(self.term, Some(from));
                self.handle_snapshot(from, snapshot);
                Ok(())
            }
            MessageKind::RequestVoteResponse { reject } => {
                match self.poll(from, !reject) {
                    VoteResult::Won => self.become_leader(),
                    VoteResult::Lost => self.become_follower(self.term, None),
                    VoteResult::Pending => {}
                }
                Ok(())
            }
            MessageKind::Hup
            | MessageKind::Beat
            | MessageKind::AppendResponse { .. }
            | MessageKind::HeartbeatResponse => Ok(()),
        }
    }

    fn step_leader(&mut self, from: u64, kind: MessageKind) -> Result<()> {
        match kind {
            MessageKind::Beat => {
                self.bcast_heartbeat();
                Ok(())
            }
            MessageKind::Propose { entries } => self.handle_propose(entries),
            MessageKind::AppendResponse { index, reject } => {
                self.handle_append_response(from, index, reject);
                Ok(())
            }
            MessageKind::HeartbeatResponse => {
                // the ack doubles as a retry opportunity for lagging peers
                let lagging = self
                    .progresses
                    .get(&from)
                    .is_some_and(|pr| pr.matched < self.raft_log.last_index());
                if lagging {
                    self.send_append(from);
                }
                Ok(())
            }
            MessageKind::RequestVote { index, log_term } => {
                self.handle_request_vote(from, index, log_term);
                Ok(())
            }
            // an equal-term append/heartbeat would mean two leaders in one
            // term; there is nothing sane to answer
            MessageKind::Hup
            | MessageKind::Append { .. }
            | MessageKind::Heartbeat { .. }
            | MessageKind::Snapshot { .. }
            | MessageKind::RequestVoteResponse { .. } => Ok(()),
        }
    }

    // -- election --

    fn hup(&mut self) {
        if self.state == NodeState::Leader {
            debug!(id = self.id, "already leader, ignoring hup");
            return;
        }
        self.become_candidate();
        // our own vote may already decide a single-node cluster
        if self.poll(self.id, true) == VoteResult::Won {
            self.become_leader();
            return;
        }
        for to in self.peer_ids() {
            let m = self.new_request_vote_message(to);
            self.send(m);
        }
    }

    /// record one vote and tally the election
    fn poll(&mut self, from: u64, granted: bool) -> VoteResult {
        self.votes.entry(from).or_insert(granted);
        let granted_count = self.votes.values().filter(|&&g| g).count();
        let rejected_count = self.votes.len() - granted_count;
        debug!(
            id = self.id,
            term = self.term,
            granted_count,
            rejected_count,
            "tallied votes"
        );
        if granted_count >= self.quorum_size() {
            VoteResult::Won
        } else if rejected_count >= self.quorum_size() {
            VoteResult::Lost
        } else {
            VoteResult::Pending
        }
    }

    /// decide a vote request at our own term
    fn handle_request_vote(&mut self, from: u64, index: u64, log_term: u64) {
        let can_vote = match self.vote {
            None => true,
            Some(v) => v == from,
        };
        // the candidate's log must be at least as up-to-date as ours
        let log_ok = log_term > self.raft_log.last_term()
            || (log_term == self.raft_log.last_term() && index >= self.raft_log.last_index());
        let grant = can_vote && log_ok;

        if grant {
            self.vote = Some(from);
            self.reset_election_timer();
        }
        debug!(id = self.id, term = self.term, from, grant, "voting");
        let m = self.new_request_vote_response(from, !grant);
        self.send(m);
    }

    // -- log replication --

    /// follower side of the append rpc
    fn handle_append(
        &mut self,
        from: u64,
        prev_index: u64,
        prev_log_term: u64,
        entries: Vec<Entry>,
        commit: u64,
    ) {
        let prev_term = match self.raft_log.entry_at(prev_index) {
            Ok(entry) => entry.term,
            Err(Error::Compacted(_)) => {
                // the prev entry sits under our compaction floor, which is
                // by construction below our commit: we already hold that
                // prefix, so tell the leader where we really are
                let index = self.raft_log.committed;
                let m = self.new_append_response(from, index, false);
                self.send(m);
                return;
            }
            Err(_) => {
                // we do not have the prev entry at all
                let m = self.new_append_response(from, 0, true);
                self.send(m);
                return;
            }
        };
        if prev_term != prev_log_term {
            let m = self.new_append_response(from, 0, true);
            self.send(m);
            return;
        }

        self.lead = Some(from);
        self.reset_election_timer();

        let last_new = prev_index + entries.len() as u64;
        for entry in entries {
            if self.raft_log.is_conflict(entry.index, entry.term) {
                if entry.index <= self.raft_log.last_index() {
                    self.raft_log.truncate(entry.index);
                }
                self.raft_log.append(std::slice::from_ref(&entry));
            }
            // a contained entry with a matching term is already ours
        }

        if commit > self.raft_log.committed {
            self.raft_log.update_commit(commit.min(last_new));
        }
        let m = self.new_append_response(from, last_new, false);
        self.send(m);
    }

    /// follower side of the heartbeat rpc
    fn handle_heartbeat(&mut self, from: u64, commit: u64) {
        self.lead = Some(from);
        self.reset_election_timer();
        // the leader clamps commit to what we are known to hold
        self.raft_log.update_commit(commit);
        let m = self.new_heartbeat_response(from);
        self.send(m);
    }

    /// follower side of the snapshot rpc
    fn handle_snapshot(&mut self, from: u64, snapshot: Snapshot) {
        self.lead = Some(from);
        self.reset_election_timer();

        let meta = snapshot.metadata.clone();
        if meta.index <= self.raft_log.committed {
            // stale snapshot; report where we actually are
            let index = self.raft_log.committed;
            let m = self.new_append_response(from, index, false);
            self.send(m);
            return;
        }
        info!(
            id = self.id,
            index = meta.index,
            term = meta.term,
            "installing snapshot"
        );
        // any suffix we hold past the snapshot may diverge from the
        // leader's history; acking it without matching would be unsafe
        if self.raft_log.last_index() > meta.index {
            self.raft_log.truncate(meta.index + 1);
        }
        self.raft_log.compact_to(meta.index, meta.term);
        if !meta.conf_state.peers.is_empty() {
            self.peers = meta.conf_state.peers.clone();
            self.progresses = self
                .peers
                .iter()
                .map(|&p| (p, Progress::default()))
                .collect();
        }
        self.raft_log.pending_snapshot = Some(snapshot);

        let m = self.new_append_response(from, meta.index, false);
        self.send(m);
    }

    /// leader side of the append response
    fn handle_append_response(&mut self, from: u64, index: u64, reject: bool) {
        let Some(progress) = self.progresses.get_mut(&from) else {
            warn!(id = self.id, from, "append response from unknown peer");
            return;
        };
        if reject {
            progress.back_off();
            debug!(
                id = self.id,
                from,
                next = progress.next,
                "append rejected, backing off"
            );
            return;
        }
        progress.maybe_update(index);
        // followers learn a new commit on the next heartbeat
        self.maybe_commit();
    }

    /// advance the commit index if a quorum of matches allows it
    ///
    /// only entries of the current term commit by counting replicas
    fn maybe_commit(&mut self) -> bool {
        let mut matches: Vec<u64> = self.progresses.values().map(|p| p.matched).collect();
        matches.sort_unstable_by(|a, b| b.cmp(a));
        let candidate = matches[self.quorum_size() - 1];
        if candidate <= self.raft_log.committed {
            return false;
        }
        match self.raft_log.term(candidate) {
            Ok(term) if term == self.term => {
                self.raft_log.update_commit(candidate);
                debug!(id = self.id, committed = candidate, "commit advanced");
                true
            }
            _ => false,
        }
    }

    /// leader side of a host proposal
    fn handle_propose(&mut self, entries: Vec<Entry>) -> Result<()> {
        if self.lead_transferee.is_some() {
            return Err(Error::ProposalDropped);
        }
        for entry in &entries {
            if entry.kind == EntryKind::ConfChange && self.raft_log.applied < self.pending_conf_index
            {
                // one membership change in the log at a time
                return Err(Error::ProposalDropped);
            }
        }
        self.leader_append_entries(entries);
        self.bcast_append();
        Ok(())
    }

    /// stamp entries with the current term and tail indices, then append
    fn leader_append_entries(&mut self, mut entries: Vec<Entry>) -> u64 {
        assert_eq!(self.state, NodeState::Leader, "only a leader appends");
        let mut index = self.raft_log.last_index();
        for entry in &mut entries {
            index += 1;
            entry.term = self.term;
            entry.index = index;
            if entry.kind == EntryKind::ConfChange {
                self.pending_conf_index = entry.index;
            }
        }
        let last = self.raft_log.append(&entries);
        self.progresses
            .get_mut(&self.id)
            .expect("leader tracks its own progress")
            .maybe_update(last);
        self.maybe_commit();
        last
    }

    fn bcast_append(&mut self) {
        for to in self.peer_ids() {
            self.send_append(to);
        }
    }

    /// send the peer everything from its next index on, falling back to a
    /// snapshot when that is already compacted
    fn send_append(&mut self, to: u64) {
        let progress = self.progresses[&to];
        if progress.next == self.raft_log.last_index() + 1 {
            // nothing to send; the heartbeat keeps the session alive
            return;
        }
        let m = self.new_append_message(to, progress.next);
        self.send(m);
    }

    fn bcast_heartbeat(&mut self) {
        self.heartbeat_elapsed = 0;
        for to in self.peer_ids() {
            let m = self.new_heartbeat_message(to);
            self.send(m);
        }
    }

    // -- message construction --

    fn new_request_vote_message(&self, to: u64) -> Message {
        assert_eq!(self.state, NodeState::Candidate, "only a candidate campaigns");
        Message {
            from: self.id,
            to,
            term: self.term,
            kind: MessageKind::RequestVote {
                index: self.raft_log.last_index(),
                log_term: self.raft_log.last_term(),
            },
        }
    }

    fn new_request_vote_response(&self, to: u64, reject: bool) -> Message {
        Message {
            from: self.id,
            to,
            term: self.term,
            kind: MessageKind::RequestVoteResponse { reject },
        }
    }

    fn new_append_message(&self, to: u64, next: u64) -> Message {
        assert_eq!(self.state, NodeState::Leader, "only a leader appends");
        match self.raft_log.entry_at(next - 1) {
            Ok(prev) => Message {
                from: self.id,
                to,
                term: self.term,
                kind: MessageKind::Append {
                    index: prev.index,
                    log_term: prev.term,
                    entries: self.raft_log.slice(next, self.raft_log.last_index()),
                    commit: self.raft_log.committed,
                },
            },
            Err(Error::Compacted(_)) => match self.raft_log.store().snapshot() {
                Ok(snapshot) => {
                    info!(id = self.id, to, "next entry compacted, sending snapshot");
                    Message {
                        from: self.id,
                        to,
                        term: self.term,
                        kind: MessageKind::Snapshot { snapshot },
                    }
                }
                Err(Error::SnapshotTemporarilyUnavailable) => {
                    debug!(id = self.id, to, "snapshot unavailable, heartbeating instead");
                    self.new_heartbeat_message(to)
                }
                Err(e) => panic!("snapshot for {to} failed: {e}"),
            },
            Err(e) => panic!("no entry before next index {next} for {to}: {e}"),
        }
    }

    fn new_append_response(&self, to: u64, index: u64, reject: bool) -> Message {
        Message {
            from: self.id,
            to,
            term: self.term,
            kind: MessageKind::AppendResponse { index, reject },
        }
    }

    fn new_heartbeat_message(&self, to: u64) -> Message {
        assert_eq!(self.state, NodeState::Leader, "only a leader heartbeats");
        let matched = self.progresses.get(&to).map_or(0, |p| p.matched);
        Message {
            from: self.id,
            to,
            term: self.term,
            kind: MessageKind::Heartbeat {
                commit: matched.min(self.raft_log.committed),
            },
        }
    }

    fn new_heartbeat_response(&self, to: u64) -> Message {
        Message {
            from: self.id,
            to,
            term: self.term,
            kind: MessageKind::HeartbeatResponse,
        }
    }

    /// queue an outbound message for the host to drain
    fn send(&mut self, m: Message) {
        assert_ne!(m.to, self.id, "message to self must not enter the send buffer");
        trace!(id = self.id, to = m.to, kind = ?m.kind, "sending");
        self.msgs.push(m);
    }

    // -- ready / advance --

    /// true iff there is output the host must act on
    pub fn has_ready(&self) -> bool {
        !self.msgs.is_empty()
            || self.hard_state() != self.prev_hard_state
            || self.raft_log.pending_snapshot.is_some()
            || !self.raft_log.unstable_entries().is_empty()
            || !self.raft_log.next_entries().is_empty()
    }

    /// collect everything the host must persist, apply and send
    pub fn ready(&mut self) -> Ready {
        let hard_state = self.hard_state();
        Ready {
            hard_state: (hard_state != self.prev_hard_state).then_some(hard_state),
            entries: self.raft_log.unstable_entries(),
            committed_entries: self.raft_log.next_entries(),
            messages: std::mem::take(&mut self.msgs),
            snapshot: self.raft_log.pending_snapshot.take(),
        }
    }

    /// host acknowledgment that a ready bundle was persisted and applied
    pub fn advance(&mut self, ready: &Ready) {
        if let Some(hard_state) = ready.hard_state {
            self.prev_hard_state = hard_state;
        }
        if let Some(entry) = ready.entries.last() {
            self.raft_log.stable_to(entry.index);
        }
        if let Some(entry) = ready.committed_entries.last() {
            self.raft_log.applied_to(entry.index);
        }
    }

    /// drain the send buffer without going through a full ready cycle
    pub fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.msgs)
    }
}
