//! Deterministic event scheduler.
//!
//! Uses a `BinaryHeap` with reversed `Ord` on `Event` to act as a
//! min-heap keyed by `(at, id)`. Event IDs are strictly increasing, so
//! two runs that schedule the same events in the same order always pop
//! them in the same order.
//!
//! Cancellation is lazy: a cancelled ID is remembered and the event is
//! discarded when it reaches the top of the heap.

use std::collections::{BTreeSet, BinaryHeap};

use crate::event::{Event, EventId, EventIdGen, EventKind};
use crate::time::VirtualTime;

/// The core deterministic scheduler.
///
/// Owns the event queue and the ID generator. All scheduling goes
/// through this struct to ensure monotonic IDs and deterministic
/// ordering.
#[derive(Debug, Default)]
pub struct Scheduler {
    /// Min-heap (via reversed Ord on Event).
    queue: BinaryHeap<Event>,

    /// Monotonic event-ID generator.
    id_gen: EventIdGen,

    /// IDs cancelled but not yet popped.
    cancelled: BTreeSet<EventId>,

    /// Events discarded by lazy cancellation.
    cancelled_count: u64,
}

impl Scheduler {
    /// Create a new, empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a new event at the given virtual time.
    ///
    /// Returns the `EventId` assigned to this event.
    pub fn schedule(&mut self, at: VirtualTime, kind: EventKind) -> EventId {
        let id = self.id_gen.next_id();
        self.queue.push(Event::new(id, at, kind));
        id
    }

    /// Cancel a pending event, best-effort.
    ///
    /// The event stays in the heap and is silently discarded when
    /// popped. Cancelling an ID that already fired has no effect.
    pub fn cancel(&mut self, id: EventId) {
        self.cancelled.insert(id);
    }

    /// Pop the next live event (earliest time, lowest ID), skipping any
    /// cancelled ones. Returns `None` when the queue is exhausted.
    pub fn pop_next(&mut self) -> Option<Event> {
        while let Some(event) = self.queue.pop() {
            if self.cancelled.remove(&event.id) {
                self.cancelled_count += 1;
                continue;
            }
            return Some(event);
        }
        None
    }

    /// Peek at the next live event without removing it.
    pub fn peek_next(&mut self) -> Option<&Event> {
        loop {
            let is_cancelled = match self.queue.peek() {
                Some(event) => self.cancelled.contains(&event.id),
                None => return None,
            };
            if !is_cancelled {
                break;
            }
            let event = self.queue.pop().expect("peeked event vanished");
            self.cancelled.remove(&event.id);
            self.cancelled_count += 1;
        }
        self.queue.peek()
    }

    /// Returns `true` if no live events remain.
    pub fn is_empty(&mut self) -> bool {
        self.peek_next().is_none()
    }

    /// Number of queued events, including not-yet-discarded cancellations.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Events discarded through `cancel` so far.
    pub fn cancelled_count(&self) -> u64 {
        self.cancelled_count
    }
}
