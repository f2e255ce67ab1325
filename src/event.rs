//! Event system for the deterministic simulation kernel.
//!
//! Every effect in the simulator is modeled as an `Event`. Events are
//! immutable records placed on the scheduler's priority queue and
//! dispatched in deterministic `(time, seq)` order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::fault::FaultKind;
use crate::message::Message;
use crate::raft::NodeId;
use crate::time::VirtualTime;

// ── Event ID ──────────────────────────────────────────────────────────

/// A globally unique, strictly increasing event identifier.
///
/// The monotonic nature of `EventId` breaks ties in the scheduler: two
/// events scheduled at the same `VirtualTime` are ordered by their
/// `EventId`, which corresponds to scheduling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    /// Wrap a raw u64 into an `EventId`.
    #[inline]
    pub fn new(raw: u64) -> Self {
        EventId(raw)
    }

    /// Return the raw value.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

// ── Event ID Generator ────────────────────────────────────────────────

/// Deterministic, strictly-increasing event-ID generator.
///
/// Each scheduler owns exactly one of these. The simulation is
/// single-threaded, so the counter is trivially deterministic.
#[derive(Debug, Clone, Default)]
pub struct EventIdGen {
    next: u64,
}

impl EventIdGen {
    /// Create a generator starting at 0.
    pub fn new() -> Self {
        EventIdGen { next: 0 }
    }

    /// Mint the next event ID.
    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next);
        self.next += 1;
        id
    }

    /// Peek at the next ID without consuming it.
    pub fn peek(&self) -> EventId {
        EventId(self.next)
    }
}

// ── Event Kind ────────────────────────────────────────────────────────

/// The payload of an event.
///
/// `Send` is routed to the network layer, which turns it into zero, one,
/// or two `Deliver` events depending on the fault model. Everything else
/// is routed to a node or to the fault machinery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Intent to send a message; the network decides its fate.
    Send {
        from: NodeId,
        to: NodeId,
        msg: Message,
    },

    /// A message that survived the network and is due at its target.
    Deliver {
        from: NodeId,
        to: NodeId,
        msg: Message,
    },

    /// A node's election timer expired. Stale if `generation` lags the
    /// node's current timer generation.
    ElectionTimeout { node: NodeId, generation: u64 },

    /// A leader's heartbeat cadence tick, same staleness rule.
    HeartbeatTick { node: NodeId, generation: u64 },

    /// Toggle node liveness or partition membership.
    FaultToggle { fault: FaultKind },

    /// A client command aimed at whoever leads when it fires.
    ClientSubmit { command: Vec<u8> },
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Send { from, to, msg } => write!(f, "Send({from} -> {to}, {msg})"),
            EventKind::Deliver { from, to, msg } => {
                write!(f, "Deliver({from} -> {to}, {msg})")
            }
            EventKind::ElectionTimeout { node, generation } => {
                write!(f, "ElectionTimeout({node}, g{generation})")
            }
            EventKind::HeartbeatTick { node, generation } => {
                write!(f, "HeartbeatTick({node}, g{generation})")
            }
            EventKind::FaultToggle { fault } => write!(f, "FaultToggle({fault})"),
            EventKind::ClientSubmit { command } => {
                write!(f, "ClientSubmit({} bytes)", command.len())
            }
        }
    }
}

// ── Event ─────────────────────────────────────────────────────────────

/// A single simulation event.
///
/// The scheduler orders events by `(at, id)` to guarantee deterministic
/// processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier (monotonically increasing).
    pub id: EventId,

    /// The virtual time at which this event fires.
    pub at: VirtualTime,

    /// The event payload.
    pub kind: EventKind,
}

impl Event {
    /// Convenience constructor.
    pub fn new(id: EventId, at: VirtualTime, kind: EventKind) -> Self {
        Event { id, at, kind }
    }
}

/// Ordering: smallest `(at, id)` first.
///
/// Rust's `BinaryHeap` is a *max*-heap, so the natural ordering is
/// reversed here to turn it into a min-heap.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
