//! Event trace recording and replay verification.
//!
//! When tracing is enabled, every dispatched event is appended to an
//! in-memory log of `(seq, time, kind)` records. Two runs with the same
//! seed and config must produce identical traces; the deterministic
//! hash gives a cheap fingerprint for that comparison, and the
//! JSON-lines export makes traces diffable offline.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::event::{Event, EventKind};
use crate::fault::FaultKind;
use crate::message::Message;
use crate::time::VirtualTime;

// ── Hash utilities ────────────────────────────────────────────────────

/// Combine two u64 hashes deterministically.
pub fn hash_combine(a: u64, b: u64) -> u64 {
    let mut h = a;
    h = h.wrapping_mul(0x517cc1b727220a95);
    h = h.wrapping_add(b);
    h ^= h >> 32;
    h
}

/// Hash a byte slice deterministically (FNV-1a variant).
pub fn hash_bytes(data: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in data {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

// ── Trace records ─────────────────────────────────────────────────────

/// One dispatched event, as recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Scheduler sequence number.
    pub seq: u64,
    /// Virtual time of dispatch.
    pub at: VirtualTime,
    /// The event payload.
    pub kind: EventKind,
}

/// Append-only record of every dispatched event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTrace {
    records: Vec<TraceRecord>,
    running_hash: u64,
}

impl EventTrace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatched event.
    pub fn record(&mut self, event: &Event) {
        let record = TraceRecord {
            seq: event.id.raw(),
            at: event.at,
            kind: event.kind.clone(),
        };
        self.running_hash = hash_combine(self.running_hash, record_hash(&record));
        self.records.push(record);
    }

    /// The recorded events in dispatch order.
    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Deterministic fingerprint of the whole trace. Equal hashes for
    /// equal seed and config is the replay guarantee.
    pub fn hash(&self) -> u64 {
        self.running_hash
    }

    /// Export as JSON lines, one record per line.
    pub fn export<W: Write>(&self, w: &mut W) -> Result<(), SimError> {
        for record in &self.records {
            serde_json::to_writer(&mut *w, record)?;
            writeln!(w)?;
        }
        Ok(())
    }
}

/// Exact comparison of two traces.
pub fn traces_match(a: &EventTrace, b: &EventTrace) -> bool {
    a.records == b.records
}

// ── Structural hashing ────────────────────────────────────────────────

fn record_hash(record: &TraceRecord) -> u64 {
    let mut h = hash_combine(record.seq, record.at.as_micros());
    h = hash_combine(h, kind_hash(&record.kind));
    h
}

fn kind_hash(kind: &EventKind) -> u64 {
    match kind {
        EventKind::Send { from, to, msg } => {
            let mut h = hash_combine(1, from.raw());
            h = hash_combine(h, to.raw());
            hash_combine(h, message_hash(msg))
        }
        EventKind::Deliver { from, to, msg } => {
            let mut h = hash_combine(2, from.raw());
            h = hash_combine(h, to.raw());
            hash_combine(h, message_hash(msg))
        }
        EventKind::ElectionTimeout { node, generation } => {
            hash_combine(3, hash_combine(node.raw(), *generation))
        }
        EventKind::HeartbeatTick { node, generation } => {
            hash_combine(4, hash_combine(node.raw(), *generation))
        }
        EventKind::FaultToggle { fault } => hash_combine(5, fault_hash(fault)),
        EventKind::ClientSubmit { command } => hash_combine(6, hash_bytes(command)),
    }
}

fn message_hash(msg: &Message) -> u64 {
    match msg {
        Message::RequestVote {
            term,
            candidate_id,
            last_log_index,
            last_log_term,
        } => {
            let mut h = hash_combine(1, *term);
            h = hash_combine(h, candidate_id.raw());
            h = hash_combine(h, *last_log_index);
            hash_combine(h, *last_log_term)
        }
        Message::RequestVoteReply { term, vote_granted } => {
            hash_combine(2, hash_combine(*term, *vote_granted as u64))
        }
        Message::AppendEntries {
            term,
            leader_id,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        } => {
            let mut h = hash_combine(3, *term);
            h = hash_combine(h, leader_id.raw());
            h = hash_combine(h, *prev_log_index);
            h = hash_combine(h, *prev_log_term);
            h = hash_combine(h, *leader_commit);
            for entry in entries {
                h = hash_combine(h, entry.term);
                h = hash_combine(h, entry.index);
                h = hash_combine(h, hash_bytes(&entry.command));
            }
            h
        }
        Message::AppendEntriesReply {
            term,
            success,
            match_index,
            conflict_index,
        } => {
            let mut h = hash_combine(4, *term);
            h = hash_combine(h, *success as u64);
            h = hash_combine(h, *match_index);
            hash_combine(h, conflict_index.map_or(u64::MAX, |c| c))
        }
        Message::InstallSnapshot {
            term,
            leader_id,
            last_included_index,
            last_included_term,
        } => {
            let mut h = hash_combine(5, *term);
            h = hash_combine(h, leader_id.raw());
            h = hash_combine(h, *last_included_index);
            hash_combine(h, *last_included_term)
        }
    }
}

fn fault_hash(fault: &FaultKind) -> u64 {
    match fault {
        FaultKind::Crash(node) => hash_combine(1, node.raw()),
        FaultKind::Recover(node) => hash_combine(2, node.raw()),
        FaultKind::CrashLeader => 3,
        FaultKind::IsolateLeader => 4,
        FaultKind::Partition(groups) => {
            let mut h = 5;
            for group in groups {
                h = hash_combine(h, group.len() as u64);
                for node in group {
                    h = hash_combine(h, node.raw());
                }
            }
            h
        }
        FaultKind::Heal => 6,
    }
}
