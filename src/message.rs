//! Raft RPC messages.
//!
//! Every RPC is modeled as a pair of asynchronous sends; there are no
//! blocking calls anywhere in the protocol. `InstallSnapshot` is a
//! reserved hook for log compaction and is not yet handled.

use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::raft::NodeId;

/// The tagged union of every message that crosses the simulated network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Candidate solicits a vote.
    RequestVote {
        term: u64,
        candidate_id: NodeId,
        last_log_index: u64,
        last_log_term: u64,
    },

    /// Voter's answer. The granter is identified by the delivery
    /// envelope, not the payload.
    RequestVoteReply { term: u64, vote_granted: bool },

    /// Leader replicates entries (empty `entries` is a heartbeat).
    AppendEntries {
        term: u64,
        leader_id: NodeId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    },

    /// Follower's answer to `AppendEntries`. On rejection,
    /// `conflict_index` points at the first index of the conflicting
    /// term so the leader can back off in one step.
    AppendEntriesReply {
        term: u64,
        success: bool,
        match_index: u64,
        conflict_index: Option<u64>,
    },

    /// Reserved for log compaction. Currently ignored by receivers.
    InstallSnapshot {
        term: u64,
        leader_id: NodeId,
        last_included_index: u64,
        last_included_term: u64,
    },
}

impl Message {
    /// The sender's term, carried by every message kind.
    pub fn term(&self) -> u64 {
        match self {
            Message::RequestVote { term, .. }
            | Message::RequestVoteReply { term, .. }
            | Message::AppendEntries { term, .. }
            | Message::AppendEntriesReply { term, .. }
            | Message::InstallSnapshot { term, .. } => *term,
        }
    }

    /// Short tag for logs and traces.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestVote { .. } => "RequestVote",
            Message::RequestVoteReply { .. } => "RequestVoteReply",
            Message::AppendEntries { .. } => "AppendEntries",
            Message::AppendEntriesReply { .. } => "AppendEntriesReply",
            Message::InstallSnapshot { .. } => "InstallSnapshot",
        }
    }

    /// Whether this is a request that deserves a negative reply when it
    /// arrives with a stale term (replies are simply dropped).
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::RequestVote { .. }
                | Message::AppendEntries { .. }
                | Message::InstallSnapshot { .. }
        )
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(t{})", self.kind(), self.term())
    }
}
