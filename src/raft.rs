//! The per-node Raft state machine.
//!
//! A node reacts to delivered messages and timer events through a
//! `NodeCtx` and never touches other nodes directly; every effect is a
//! scheduled event. Timers are cancelled logically: each node carries a
//! generation counter, timer events carry the generation they were armed
//! at, and the cluster runtime discards fired timers whose generation
//! has moved on.
//!
//! Persistent state (`current_term`, `voted_for`, the log) survives a
//! crash; everything volatile is rebuilt on recovery.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Timing;
use crate::event::EventKind;
use crate::log::{LogEntry, RaftLog};
use crate::message::Message;
use crate::simulation::SimulationContext;

// ── NodeId ────────────────────────────────────────────────────────────

/// A unique identifier for a simulated node. Doubles as the node's
/// index in the cluster arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(u64);

impl NodeId {
    #[inline]
    pub fn new(id: u64) -> Self {
        NodeId(id)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Arena index of this node.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "N{}", self.0)
    }
}

// ── Role ──────────────────────────────────────────────────────────────

/// The three Raft roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Follower => "follower",
            Role::Candidate => "candidate",
            Role::Leader => "leader",
        };
        f.write_str(s)
    }
}

// ── Node context ──────────────────────────────────────────────────────

/// Everything a node may touch while handling one event: the scheduler
/// (through the simulation context), the shared PRNG, and the timing
/// parameters. Handlers run to completion; there are no suspension
/// points.
pub struct NodeCtx<'a, 'b> {
    pub sim: &'a mut SimulationContext<'b>,
    pub rng: &'a mut ChaCha8Rng,
    pub timing: &'a Timing,
}

// ── RaftNode ──────────────────────────────────────────────────────────

/// One Raft participant.
#[derive(Debug)]
pub struct RaftNode {
    id: NodeId,
    peers: Vec<NodeId>,
    cluster_size: usize,

    // Persistent state: survives a crash.
    current_term: u64,
    voted_for: Option<NodeId>,
    log: RaftLog,

    // Volatile state.
    role: Role,
    commit_index: u64,
    last_applied: u64,
    applied: Vec<Vec<u8>>,
    alive: bool,

    // Candidate bookkeeping: who granted us a vote this term. A set, so
    // a duplicated reply can never count twice.
    votes: BTreeSet<NodeId>,

    // Leader bookkeeping, rebuilt on every election win.
    next_index: BTreeMap<NodeId, u64>,
    match_index: BTreeMap<NodeId, u64>,

    // Logical timer cancellation.
    timer_generation: u64,

    // Counters.
    elections_started: u64,
    append_rejections: u64,
}

impl RaftNode {
    /// Create a node in the initial state: Follower, term 0, empty log.
    pub fn new(id: NodeId, cluster_size: usize) -> Self {
        let peers = (0..cluster_size as u64)
            .map(NodeId::new)
            .filter(|&p| p != id)
            .collect();
        RaftNode {
            id,
            peers,
            cluster_size,
            current_term: 0,
            voted_for: None,
            log: RaftLog::new(),
            role: Role::Follower,
            commit_index: 0,
            last_applied: 0,
            applied: Vec::new(),
            alive: true,
            votes: BTreeSet::new(),
            next_index: BTreeMap::new(),
            match_index: BTreeMap::new(),
            timer_generation: 0,
            elections_started: 0,
            append_rejections: 0,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn log(&self) -> &RaftLog {
        &self.log
    }

    /// Commands applied to the node's state machine, in order.
    pub fn applied(&self) -> &[Vec<u8>] {
        &self.applied
    }

    pub fn alive(&self) -> bool {
        self.alive
    }

    /// Current timer generation; events armed at older generations are
    /// stale.
    pub fn timer_generation(&self) -> u64 {
        self.timer_generation
    }

    pub fn elections_started(&self) -> u64 {
        self.elections_started
    }

    /// Replication rejections observed as leader; each one triggers a
    /// backoff retry on the next heartbeat.
    pub fn append_rejections(&self) -> u64 {
        self.append_rejections
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Arm the initial election timer. Called once at cluster start.
    pub fn start(&mut self, ctx: &mut NodeCtx) {
        self.reset_election_timer(ctx);
    }

    /// Crash the node. Persistent state is retained; the node stops
    /// reacting to any event until recovery.
    pub fn crash(&mut self) {
        self.alive = false;
        info!(node = %self.id, term = self.current_term, "crashed");
    }

    /// Recover from a crash: rejoin as a follower with volatile state
    /// cleared and a fresh election timer.
    pub fn recover(&mut self, ctx: &mut NodeCtx) {
        self.alive = true;
        self.role = Role::Follower;
        self.commit_index = 0;
        self.last_applied = 0;
        self.applied.clear();
        self.votes.clear();
        self.next_index.clear();
        self.match_index.clear();
        self.reset_election_timer(ctx);
        info!(node = %self.id, term = self.current_term, "recovered");
    }

    // ── Event entry points ────────────────────────────────────────

    /// Handle a delivered message. The cluster runtime has already
    /// filtered deliveries to crashed nodes.
    pub fn on_message(&mut self, ctx: &mut NodeCtx, from: NodeId, msg: Message) {
        let term = msg.term();

        // Any message from a newer term demotes us first.
        if term > self.current_term {
            self.step_down(ctx, term);
        }

        // Stale requests learn our term; stale replies are dropped.
        if term < self.current_term {
            match msg {
                Message::RequestVote { .. } => self.send(
                    ctx,
                    from,
                    Message::RequestVoteReply {
                        term: self.current_term,
                        vote_granted: false,
                    },
                ),
                Message::AppendEntries { .. } => self.send(
                    ctx,
                    from,
                    Message::AppendEntriesReply {
                        term: self.current_term,
                        success: false,
                        match_index: 0,
                        conflict_index: None,
                    },
                ),
                _ => {}
            }
            return;
        }

        match msg {
            Message::RequestVote {
                candidate_id,
                last_log_index,
                last_log_term,
                ..
            } => self.handle_request_vote(ctx, candidate_id, last_log_index, last_log_term),
            Message::RequestVoteReply { vote_granted, .. } => {
                self.handle_vote_reply(ctx, from, vote_granted)
            }
            Message::AppendEntries {
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
                ..
            } => self.handle_append_entries(
                ctx,
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            ),
            Message::AppendEntriesReply {
                success,
                match_index,
                conflict_index,
                ..
            } => self.handle_append_reply(from, success, match_index, conflict_index),
            Message::InstallSnapshot { .. } => {
                debug!(node = %self.id, "snapshot transfer not implemented, ignoring");
            }
        }
    }

    /// The election timer fired. The cluster has already discarded
    /// stale generations and crashed nodes.
    pub fn on_election_timeout(&mut self, ctx: &mut NodeCtx) {
        if self.role == Role::Leader {
            return;
        }
        self.become_candidate(ctx);
    }

    /// The heartbeat cadence fired (leaders only).
    pub fn on_heartbeat_tick(&mut self, ctx: &mut NodeCtx) {
        if self.role != Role::Leader {
            return;
        }
        self.broadcast_append(ctx);
        ctx.sim.schedule_after(
            ctx.timing.heartbeat,
            EventKind::HeartbeatTick {
                node: self.id,
                generation: self.timer_generation,
            },
        );
    }

    /// A client command arrived. Returns `true` if this node is the
    /// leader and accepted it.
    pub fn on_client_command(&mut self, ctx: &mut NodeCtx, command: Vec<u8>) -> bool {
        if self.role != Role::Leader {
            return false;
        }
        let index = self.log.append_command(self.current_term, command);
        debug!(node = %self.id, term = self.current_term, index, "accepted client command");
        self.broadcast_append(ctx);
        true
    }

    // ── Transitions ───────────────────────────────────────────────

    /// Demote to follower. Adopts `term` when it is newer (clearing the
    /// vote); resets the election timer only when leaving an active
    /// role, so a follower's running timer is undisturbed.
    fn step_down(&mut self, ctx: &mut NodeCtx, term: u64) {
        assert!(
            term >= self.current_term,
            "{}: term must never decrease ({} -> {})",
            self.id,
            self.current_term,
            term
        );
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
        }
        let was_active = self.role != Role::Follower;
        if was_active {
            info!(node = %self.id, term = self.current_term, "stepping down to follower");
        }
        self.role = Role::Follower;
        self.votes.clear();
        self.next_index.clear();
        self.match_index.clear();
        if was_active {
            self.reset_election_timer(ctx);
        }
    }

    fn become_candidate(&mut self, ctx: &mut NodeCtx) {
        self.current_term += 1;
        self.role = Role::Candidate;
        self.voted_for = Some(self.id);
        self.votes.clear();
        self.votes.insert(self.id);
        self.elections_started += 1;
        info!(node = %self.id, term = self.current_term, "election timeout, starting election");
        self.reset_election_timer(ctx);

        let last_log_index = self.log.last_index();
        let last_log_term = self.log.last_term();
        for &peer in &self.peers {
            self.send(
                ctx,
                peer,
                Message::RequestVote {
                    term: self.current_term,
                    candidate_id: self.id,
                    last_log_index,
                    last_log_term,
                },
            );
        }

        // Degenerate single-node cluster: self-vote is already a majority.
        if self.votes.len() * 2 > self.cluster_size {
            self.become_leader(ctx);
        }
    }

    fn become_leader(&mut self, ctx: &mut NodeCtx) {
        info!(node = %self.id, term = self.current_term, "won election, assuming leadership");
        self.role = Role::Leader;
        self.votes.clear();
        let next = self.log.last_index() + 1;
        self.next_index = self.peers.iter().map(|&p| (p, next)).collect();
        self.match_index = self.peers.iter().map(|&p| (p, 0)).collect();

        // Invalidate the pending election timeout and start the
        // heartbeat cadence immediately.
        self.timer_generation += 1;
        ctx.sim.schedule_after(
            0,
            EventKind::HeartbeatTick {
                node: self.id,
                generation: self.timer_generation,
            },
        );
    }

    fn reset_election_timer(&mut self, ctx: &mut NodeCtx) {
        self.timer_generation += 1;
        let delay = ctx
            .rng
            .gen_range(ctx.timing.election_min..=ctx.timing.election_max);
        ctx.sim.schedule_after(
            delay,
            EventKind::ElectionTimeout {
                node: self.id,
                generation: self.timer_generation,
            },
        );
    }

    // ── RPC handlers (msg.term == current_term) ───────────────────

    fn handle_request_vote(
        &mut self,
        ctx: &mut NodeCtx,
        candidate_id: NodeId,
        last_log_index: u64,
        last_log_term: u64,
    ) {
        let up_to_date = last_log_term > self.log.last_term()
            || (last_log_term == self.log.last_term() && last_log_index >= self.log.last_index());
        let grant =
            (self.voted_for.is_none() || self.voted_for == Some(candidate_id)) && up_to_date;

        if grant {
            self.voted_for = Some(candidate_id);
            self.reset_election_timer(ctx);
        }
        debug!(
            node = %self.id,
            term = self.current_term,
            candidate = %candidate_id,
            grant,
            "vote request"
        );
        self.send(
            ctx,
            candidate_id,
            Message::RequestVoteReply {
                term: self.current_term,
                vote_granted: grant,
            },
        );
    }

    fn handle_vote_reply(&mut self, ctx: &mut NodeCtx, from: NodeId, vote_granted: bool) {
        if self.role != Role::Candidate || !vote_granted {
            return;
        }
        self.votes.insert(from);
        debug!(
            node = %self.id,
            term = self.current_term,
            votes = self.votes.len(),
            needed = self.cluster_size / 2 + 1,
            "vote granted"
        );
        if self.votes.len() * 2 > self.cluster_size {
            self.become_leader(ctx);
        }
    }

    fn handle_append_entries(
        &mut self,
        ctx: &mut NodeCtx,
        leader_id: NodeId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) {
        // A same-term candidate recognizes the established leader. Two
        // same-term leaders cannot exist, so a Leader never sees this.
        if self.role != Role::Follower {
            self.step_down(ctx, self.current_term);
        }
        self.reset_election_timer(ctx);

        let consistent = self.log.term_at(prev_log_index) == Some(prev_log_term);
        if !consistent {
            let conflict_index = if prev_log_index > self.log.last_index() {
                self.log.last_index() + 1
            } else {
                self.log.first_index_of_term(prev_log_index)
            };
            debug!(
                node = %self.id,
                prev_log_index,
                prev_log_term,
                conflict_index,
                "rejecting entries, log inconsistent"
            );
            self.send(
                ctx,
                leader_id,
                Message::AppendEntriesReply {
                    term: self.current_term,
                    success: false,
                    match_index: 0,
                    conflict_index: Some(conflict_index),
                },
            );
            return;
        }

        for entry in &entries {
            match self.log.term_at(entry.index) {
                // Identical entry already present: repeated delivery is
                // a no-op.
                Some(t) if t == entry.term => {}
                // Conflicting entry: drop it and everything after.
                Some(_) => {
                    assert!(
                        entry.index > self.commit_index,
                        "{}: conflict at committed index {} (commit_index {})",
                        self.id,
                        entry.index,
                        self.commit_index
                    );
                    self.log.truncate_from(entry.index);
                    self.log.push(entry.clone());
                }
                None => self.log.push(entry.clone()),
            }
        }

        let last_new = prev_log_index + entries.len() as u64;
        if leader_commit > self.commit_index {
            // max() guards against a reordered, shorter AppendEntries
            // shrinking an already-advanced commit index.
            self.commit_index = self.commit_index.max(leader_commit.min(last_new));
            self.apply_committed();
        }

        self.send(
            ctx,
            leader_id,
            Message::AppendEntriesReply {
                term: self.current_term,
                success: true,
                match_index: last_new,
                conflict_index: None,
            },
        );
    }

    fn handle_append_reply(
        &mut self,
        from: NodeId,
        success: bool,
        match_index: u64,
        conflict_index: Option<u64>,
    ) {
        if self.role != Role::Leader {
            return;
        }
        if success {
            // match_index only moves forward; replies can arrive out of
            // order.
            let matched = self
                .match_index
                .get(&from)
                .copied()
                .unwrap_or(0)
                .max(match_index);
            self.match_index.insert(from, matched);
            self.next_index.insert(from, matched + 1);
            self.advance_commit();
        } else {
            self.append_rejections += 1;
            let next = self.next_index.get(&from).copied().unwrap_or(1);
            let fallback = next.saturating_sub(1);
            let backed = conflict_index.unwrap_or(fallback).min(fallback).max(1);
            debug!(node = %self.id, peer = %from, next = backed, "follower rejected, backing off");
            self.next_index.insert(from, backed);
            // The next heartbeat retries from the new position.
        }
    }

    /// Send `AppendEntries` to every peer from its `next_index`. An
    /// empty entries slice is the heartbeat.
    fn broadcast_append(&self, ctx: &mut NodeCtx) {
        for &peer in &self.peers {
            let next = self
                .next_index
                .get(&peer)
                .copied()
                .unwrap_or(self.log.last_index() + 1);
            let prev_log_index = next - 1;
            let prev_log_term = self
                .log
                .term_at(prev_log_index)
                .expect("next_index points past the log");
            let entries = self.log.entries_from(next).to_vec();
            self.send(
                ctx,
                peer,
                Message::AppendEntries {
                    term: self.current_term,
                    leader_id: self.id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: self.commit_index,
                },
            );
        }
    }

    // ── Commit and apply ──────────────────────────────────────────

    /// Advance `commit_index` to the largest N replicated on a majority
    /// with `log[N].term == current_term`. Entries from prior terms are
    /// never committed by count alone; they commit only underneath a
    /// current-term entry.
    fn advance_commit(&mut self) {
        let mut n = self.log.last_index();
        while n > self.commit_index {
            if self.log.term_at(n) == Some(self.current_term) {
                let replicas = 1 + self.match_index.values().filter(|&&m| m >= n).count();
                if replicas * 2 > self.cluster_size {
                    debug!(node = %self.id, term = self.current_term, commit = n, "commit index advanced");
                    self.commit_index = n;
                    self.apply_committed();
                    return;
                }
            }
            n -= 1;
        }
    }

    fn apply_committed(&mut self) {
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            let entry = self
                .log
                .get(self.last_applied)
                .expect("committed entry missing from log");
            self.applied.push(entry.command.clone());
        }
    }

    // ── Plumbing ──────────────────────────────────────────────────

    /// Hand a message to the network by scheduling a `Send` at the
    /// current instant. Delivery timing and fate belong to the network.
    fn send(&self, ctx: &mut NodeCtx, to: NodeId, msg: Message) {
        ctx.sim.schedule_after(
            0,
            EventKind::Send {
                from: self.id,
                to,
                msg,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use crate::time::VirtualTime;
    use rand::SeedableRng;

    const N: usize = 5;

    fn timing() -> Timing {
        Timing {
            election_min: 150_000,
            election_max: 300_000,
            heartbeat: 50_000,
        }
    }

    struct Harness {
        sched: Scheduler,
        rng: ChaCha8Rng,
        timing: Timing,
        now: VirtualTime,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                sched: Scheduler::new(),
                rng: ChaCha8Rng::seed_from_u64(42),
                timing: timing(),
                now: VirtualTime::ZERO,
            }
        }

        fn with_ctx<R>(&mut self, f: impl FnOnce(&mut NodeCtx) -> R) -> R {
            let mut sim = SimulationContext {
                scheduler: &mut self.sched,
                now: self.now,
            };
            let mut ctx = NodeCtx {
                sim: &mut sim,
                rng: &mut self.rng,
                timing: &self.timing,
            };
            f(&mut ctx)
        }

        /// Pop every queued event and keep the `Send` payloads.
        fn drain_sends(&mut self) -> Vec<(NodeId, Message)> {
            let mut sends = Vec::new();
            while let Some(e) = self.sched.pop_next() {
                if let EventKind::Send { to, msg, .. } = e.kind {
                    sends.push((to, msg));
                }
            }
            sends
        }
    }

    fn n(id: u64) -> NodeId {
        NodeId::new(id)
    }

    fn entry(term: u64, index: u64) -> LogEntry {
        LogEntry {
            term,
            index,
            command: vec![index as u8],
        }
    }

    /// Promote a node to leader of `term` by walking one election.
    fn make_leader(h: &mut Harness, node: &mut RaftNode, term: u64) {
        node.current_term = term - 1;
        h.with_ctx(|ctx| node.on_election_timeout(ctx));
        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(1),
                Message::RequestVoteReply {
                    term,
                    vote_granted: true,
                },
            );
            node.on_message(
                ctx,
                n(2),
                Message::RequestVoteReply {
                    term,
                    vote_granted: true,
                },
            );
        });
        assert_eq!(node.role(), Role::Leader);
        assert_eq!(node.current_term(), term);
        h.drain_sends();
    }

    #[test]
    fn test_initial_state() {
        let node = RaftNode::new(n(0), N);
        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.current_term(), 0);
        assert_eq!(node.voted_for(), None);
        assert!(node.log().is_empty());
        assert!(node.alive());
    }

    #[test]
    fn test_election_timeout_starts_election() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);

        h.with_ctx(|ctx| node.on_election_timeout(ctx));

        assert_eq!(node.role(), Role::Candidate);
        assert_eq!(node.current_term(), 1);
        assert_eq!(node.voted_for(), Some(n(0)));
        assert_eq!(node.elections_started(), 1);

        let sends = h.drain_sends();
        let targets: Vec<NodeId> = sends.iter().map(|(to, _)| *to).collect();
        assert_eq!(targets, vec![n(1), n(2), n(3), n(4)]);
        for (_, msg) in &sends {
            assert!(matches!(msg, Message::RequestVote { term: 1, .. }));
        }
    }

    #[test]
    fn test_candidate_wins_with_majority() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);

        h.with_ctx(|ctx| node.on_election_timeout(ctx));
        let reply = |granted| Message::RequestVoteReply {
            term: 1,
            vote_granted: granted,
        };

        h.with_ctx(|ctx| node.on_message(ctx, n(1), reply(true)));
        assert_eq!(node.role(), Role::Candidate, "2 of 5 votes is not a majority");

        h.with_ctx(|ctx| node.on_message(ctx, n(2), reply(true)));
        assert_eq!(node.role(), Role::Leader, "3 of 5 votes wins");
    }

    #[test]
    fn test_duplicate_vote_reply_counts_once() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);

        h.with_ctx(|ctx| node.on_election_timeout(ctx));
        let reply = Message::RequestVoteReply {
            term: 1,
            vote_granted: true,
        };

        // The same voter's grant delivered twice (network duplication).
        h.with_ctx(|ctx| node.on_message(ctx, n(1), reply.clone()));
        h.with_ctx(|ctx| node.on_message(ctx, n(1), reply.clone()));
        assert_eq!(node.role(), Role::Candidate, "duplicate grant must not double count");

        h.with_ctx(|ctx| node.on_message(ctx, n(2), reply));
        assert_eq!(node.role(), Role::Leader);
    }

    #[test]
    fn test_vote_granted_once_per_term() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);

        let request = |candidate: u64| Message::RequestVote {
            term: 1,
            candidate_id: n(candidate),
            last_log_index: 0,
            last_log_term: 0,
        };

        h.with_ctx(|ctx| node.on_message(ctx, n(1), request(1)));
        assert_eq!(node.voted_for(), Some(n(1)));
        let sends = h.drain_sends();
        assert!(matches!(
            sends.last().unwrap().1,
            Message::RequestVoteReply {
                vote_granted: true,
                ..
            }
        ));

        // A different candidate in the same term is refused.
        h.with_ctx(|ctx| node.on_message(ctx, n(2), request(2)));
        assert_eq!(node.voted_for(), Some(n(1)), "vote must not flip within a term");
        let sends = h.drain_sends();
        assert!(matches!(
            sends.last().unwrap().1,
            Message::RequestVoteReply {
                vote_granted: false,
                ..
            }
        ));

        // Repeating the original candidate's request is idempotent.
        h.with_ctx(|ctx| node.on_message(ctx, n(1), request(1)));
        assert_eq!(node.voted_for(), Some(n(1)));
        let sends = h.drain_sends();
        assert!(matches!(
            sends.last().unwrap().1,
            Message::RequestVoteReply {
                vote_granted: true,
                ..
            }
        ));
    }

    #[test]
    fn test_vote_denied_to_stale_log() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);
        node.log.append_command(1, b"x".to_vec());
        node.current_term = 1;

        // Candidate's log ends in an older term.
        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(1),
                Message::RequestVote {
                    term: 2,
                    candidate_id: n(1),
                    last_log_index: 5,
                    last_log_term: 0,
                },
            )
        });
        assert_eq!(node.voted_for(), None, "stale log must not receive a vote");

        // Same last term but shorter log is also refused.
        h.drain_sends();
        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(2),
                Message::RequestVote {
                    term: 3,
                    candidate_id: n(2),
                    last_log_index: 0,
                    last_log_term: 1,
                },
            )
        });
        assert_eq!(node.voted_for(), None);
    }

    #[test]
    fn test_higher_term_demotes_and_clears_vote() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);
        make_leader(&mut h, &mut node, 1);

        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(3),
                Message::AppendEntries {
                    term: 5,
                    leader_id: n(3),
                    prev_log_index: 0,
                    prev_log_term: 0,
                    entries: vec![],
                    leader_commit: 0,
                },
            )
        });

        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.current_term(), 5);
        assert_eq!(node.voted_for(), None);
    }

    #[test]
    fn test_stale_term_request_gets_negative_reply() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);
        node.current_term = 4;

        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(1),
                Message::AppendEntries {
                    term: 2,
                    leader_id: n(1),
                    prev_log_index: 0,
                    prev_log_term: 0,
                    entries: vec![],
                    leader_commit: 0,
                },
            )
        });

        let sends = h.drain_sends();
        assert_eq!(sends.len(), 1);
        match &sends[0].1 {
            Message::AppendEntriesReply { term, success, .. } => {
                assert_eq!(*term, 4);
                assert!(!success);
            }
            other => panic!("unexpected reply {:?}", other),
        }
        // The deposed leader's term was not adopted.
        assert_eq!(node.current_term(), 4);
    }

    #[test]
    fn test_append_entries_appends_and_commits() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);

        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(1),
                Message::AppendEntries {
                    term: 1,
                    leader_id: n(1),
                    prev_log_index: 0,
                    prev_log_term: 0,
                    entries: vec![entry(1, 1), entry(1, 2)],
                    leader_commit: 1,
                },
            )
        });

        assert_eq!(node.log().last_index(), 2);
        assert_eq!(node.commit_index(), 1);
        assert_eq!(node.last_applied(), 1);
        assert_eq!(node.applied().len(), 1);

        let sends = h.drain_sends();
        match &sends.last().unwrap().1 {
            Message::AppendEntriesReply {
                success,
                match_index,
                ..
            } => {
                assert!(success);
                assert_eq!(*match_index, 2);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_append_entries_idempotent_redelivery() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);

        let msg = Message::AppendEntries {
            term: 1,
            leader_id: n(1),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![entry(1, 1), entry(1, 2)],
            leader_commit: 0,
        };

        h.with_ctx(|ctx| node.on_message(ctx, n(1), msg.clone()));
        let snapshot = node.log().clone();
        h.with_ctx(|ctx| node.on_message(ctx, n(1), msg));
        assert_eq!(
            node.log(),
            &snapshot,
            "repeated identical delivery must leave the log unchanged"
        );
    }

    #[test]
    fn test_append_entries_rejects_gap_with_conflict_hint() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);

        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(1),
                Message::AppendEntries {
                    term: 1,
                    leader_id: n(1),
                    prev_log_index: 7,
                    prev_log_term: 1,
                    entries: vec![entry(1, 8)],
                    leader_commit: 0,
                },
            )
        });

        assert!(node.log().is_empty());
        let sends = h.drain_sends();
        match &sends.last().unwrap().1 {
            Message::AppendEntriesReply {
                success,
                conflict_index,
                ..
            } => {
                assert!(!success);
                assert_eq!(*conflict_index, Some(1), "empty log points the leader at index 1");
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_append_entries_truncates_conflicts() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);
        // Local log diverged at index 2 in term 1.
        node.log.push(entry(1, 1));
        node.log.push(entry(1, 2));
        node.log.push(entry(1, 3));
        node.current_term = 2;

        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(1),
                Message::AppendEntries {
                    term: 2,
                    leader_id: n(1),
                    prev_log_index: 1,
                    prev_log_term: 1,
                    entries: vec![entry(2, 2)],
                    leader_commit: 0,
                },
            )
        });

        assert_eq!(node.log().last_index(), 2, "suffix after the conflict is gone");
        assert_eq!(node.log().term_at(2), Some(2));
        assert_eq!(node.log().term_at(1), Some(1), "matching prefix untouched");
    }

    #[test]
    fn test_conflict_reply_names_first_index_of_term() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);
        node.log.push(entry(1, 1));
        node.log.push(entry(2, 2));
        node.log.push(entry(2, 3));
        node.log.push(entry(2, 4));
        node.current_term = 3;

        // Leader probes index 4 expecting term 3; we hold term 2 there.
        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(1),
                Message::AppendEntries {
                    term: 3,
                    leader_id: n(1),
                    prev_log_index: 4,
                    prev_log_term: 3,
                    entries: vec![],
                    leader_commit: 0,
                },
            )
        });

        let sends = h.drain_sends();
        match &sends.last().unwrap().1 {
            Message::AppendEntriesReply { conflict_index, .. } => {
                assert_eq!(*conflict_index, Some(2), "backoff skips the whole term-2 run");
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_candidate_yields_to_same_term_leader() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);

        h.with_ctx(|ctx| node.on_election_timeout(ctx));
        assert_eq!(node.role(), Role::Candidate);

        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(1),
                Message::AppendEntries {
                    term: 1,
                    leader_id: n(1),
                    prev_log_index: 0,
                    prev_log_term: 0,
                    entries: vec![],
                    leader_commit: 0,
                },
            )
        });

        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.current_term(), 1);
    }

    #[test]
    fn test_leader_replication_bookkeeping() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);
        make_leader(&mut h, &mut node, 1);

        h.with_ctx(|ctx| {
            assert!(node.on_client_command(ctx, b"set x".to_vec()));
        });
        assert_eq!(node.log().last_index(), 1);

        // Outgoing AppendEntries carry the new entry to every peer.
        let sends = h.drain_sends();
        assert_eq!(sends.len(), 4);
        for (_, msg) in &sends {
            match msg {
                Message::AppendEntries { entries, .. } => assert_eq!(entries.len(), 1),
                other => panic!("unexpected send {:?}", other),
            }
        }

        // Two acks: majority of 5 including the leader itself.
        let ack = Message::AppendEntriesReply {
            term: 1,
            success: true,
            match_index: 1,
            conflict_index: None,
        };
        h.with_ctx(|ctx| node.on_message(ctx, n(1), ack.clone()));
        assert_eq!(node.commit_index(), 0, "one ack is not a majority");
        h.with_ctx(|ctx| node.on_message(ctx, n(2), ack));
        assert_eq!(node.commit_index(), 1);
        assert_eq!(node.last_applied(), 1);
    }

    #[test]
    fn test_stale_success_reply_does_not_regress_match() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);
        make_leader(&mut h, &mut node, 1);
        h.with_ctx(|ctx| {
            node.on_client_command(ctx, b"a".to_vec());
            node.on_client_command(ctx, b"b".to_vec());
        });

        let ack = |m| Message::AppendEntriesReply {
            term: 1,
            success: true,
            match_index: m,
            conflict_index: None,
        };
        h.with_ctx(|ctx| node.on_message(ctx, n(1), ack(2)));
        // An older ack arrives late (non-FIFO network).
        h.with_ctx(|ctx| node.on_message(ctx, n(1), ack(1)));
        assert_eq!(node.match_index.get(&n(1)), Some(&2));
        assert_eq!(node.next_index.get(&n(1)), Some(&3));
    }

    #[test]
    fn test_failed_reply_backs_off_next_index() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);
        make_leader(&mut h, &mut node, 1);
        for _ in 0..5 {
            h.with_ctx(|ctx| node.on_client_command(ctx, b"c".to_vec()));
        }
        h.drain_sends();
        assert_eq!(node.next_index.get(&n(1)), Some(&1));
        // next_index was initialised to last_index+1 = 1 at election;
        // push it forward to simulate prior progress.
        node.next_index.insert(n(1), 6);

        // Plain rejection: step back by one.
        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(1),
                Message::AppendEntriesReply {
                    term: 1,
                    success: false,
                    match_index: 0,
                    conflict_index: None,
                },
            )
        });
        assert_eq!(node.next_index.get(&n(1)), Some(&5));

        // Conflict hint: jump straight back.
        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(1),
                Message::AppendEntriesReply {
                    term: 1,
                    success: false,
                    match_index: 0,
                    conflict_index: Some(2),
                },
            )
        });
        assert_eq!(node.next_index.get(&n(1)), Some(&2));

        // Never below 1, even with a bogus hint.
        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(1),
                Message::AppendEntriesReply {
                    term: 1,
                    success: false,
                    match_index: 0,
                    conflict_index: Some(0),
                },
            )
        });
        assert_eq!(node.next_index.get(&n(1)), Some(&1));
    }

    #[test]
    fn test_no_commit_of_prior_term_by_count_alone() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);
        // Entry from term 1 sits uncommitted; the node now leads term 3.
        node.log.push(entry(1, 1));
        make_leader(&mut h, &mut node, 3);

        // Every peer acknowledges the term-1 entry.
        let ack = Message::AppendEntriesReply {
            term: 3,
            success: true,
            match_index: 1,
            conflict_index: None,
        };
        for peer in 1..5 {
            h.with_ctx(|ctx| node.on_message(ctx, n(peer), ack.clone()));
        }
        assert_eq!(
            node.commit_index(),
            0,
            "a prior-term entry must not commit by replica count alone"
        );

        // A current-term entry on a majority commits both.
        h.with_ctx(|ctx| {
            node.on_client_command(ctx, b"new".to_vec());
        });
        let ack2 = Message::AppendEntriesReply {
            term: 3,
            success: true,
            match_index: 2,
            conflict_index: None,
        };
        h.with_ctx(|ctx| node.on_message(ctx, n(1), ack2.clone()));
        h.with_ctx(|ctx| node.on_message(ctx, n(2), ack2));
        assert_eq!(node.commit_index(), 2);
    }

    #[test]
    fn test_client_command_rejected_by_non_leader() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);
        h.with_ctx(|ctx| {
            assert!(!node.on_client_command(ctx, b"nope".to_vec()));
        });
        assert!(node.log().is_empty());
    }

    #[test]
    fn test_crash_preserves_persistent_state_only() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);
        make_leader(&mut h, &mut node, 2);
        h.with_ctx(|ctx| {
            node.on_client_command(ctx, b"a".to_vec());
        });
        let ack = Message::AppendEntriesReply {
            term: 2,
            success: true,
            match_index: 1,
            conflict_index: None,
        };
        h.with_ctx(|ctx| node.on_message(ctx, n(1), ack.clone()));
        h.with_ctx(|ctx| node.on_message(ctx, n(2), ack));
        assert_eq!(node.commit_index(), 1);

        node.crash();
        assert!(!node.alive());

        h.with_ctx(|ctx| node.recover(ctx));
        assert!(node.alive());
        assert_eq!(node.role(), Role::Follower);
        // Persistent state survived.
        assert_eq!(node.current_term(), 2);
        assert_eq!(node.log().last_index(), 1);
        // Volatile state was rebuilt.
        assert_eq!(node.commit_index(), 0);
        assert_eq!(node.last_applied(), 0);
        assert!(node.applied().is_empty());
    }

    #[test]
    fn test_timer_generation_advances_on_reset() {
        let mut h = Harness::new();
        let mut node = RaftNode::new(n(0), N);
        h.with_ctx(|ctx| node.start(ctx));
        let g1 = node.timer_generation();

        h.with_ctx(|ctx| {
            node.on_message(
                ctx,
                n(1),
                Message::AppendEntries {
                    term: 1,
                    leader_id: n(1),
                    prev_log_index: 0,
                    prev_log_term: 0,
                    entries: vec![],
                    leader_commit: 0,
                },
            )
        });
        assert!(
            node.timer_generation() > g1,
            "a valid AppendEntries must re-arm the election timer"
        );
    }
}
