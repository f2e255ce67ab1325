//! Simulation execution loop.
//!
//! Drives the scheduler: pops events, advances virtual time, dispatches
//! to a handler. The loop is purely synchronous and single-threaded;
//! handlers run to completion before the next event is popped, which is
//! what makes runs reproducible from a seed.

use tracing::trace;

use crate::event::{Event, EventId, EventKind};
use crate::scheduler::Scheduler;
use crate::time::VirtualTime;
use crate::trace::EventTrace;

// ── Handler trait ─────────────────────────────────────────────────────

/// Receiver of dispatched events.
///
/// The handler gets a mutable `SimulationContext` so it can schedule
/// follow-up events. Handlers must not block or suspend.
pub trait EventHandler {
    /// Called for every dispatched event.
    fn handle(&mut self, ctx: &mut SimulationContext, event: &Event);
}

/// A handler backed by a closure, useful for tests.
impl<F> EventHandler for F
where
    F: FnMut(&mut SimulationContext, &Event),
{
    fn handle(&mut self, ctx: &mut SimulationContext, event: &Event) {
        (self)(ctx, event);
    }
}

// ── Simulation Context ────────────────────────────────────────────────

/// Mutable context passed to the handler on every event dispatch.
///
/// Provides the current virtual time and the ability to schedule
/// follow-up events. The context borrows the scheduler mutably, so a
/// handler cannot interfere with dispatch ordering outside of the
/// schedule API.
pub struct SimulationContext<'a> {
    pub(crate) scheduler: &'a mut Scheduler,
    pub(crate) now: VirtualTime,
}

impl SimulationContext<'_> {
    /// Current virtual time.
    #[inline]
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Schedule an event at an absolute virtual time.
    ///
    /// # Panics
    /// Panics if `at` is before the current time (non-causal scheduling
    /// is a programmer error).
    pub fn schedule_at(&mut self, at: VirtualTime, kind: EventKind) -> EventId {
        assert!(
            at >= self.now,
            "cannot schedule event in the past: now={}, at={}",
            self.now,
            at
        );
        self.scheduler.schedule(at, kind)
    }

    /// Schedule an event `delay` microseconds after now.
    pub fn schedule_after(&mut self, delay: u64, kind: EventKind) -> EventId {
        let at = self
            .now
            .plus(delay)
            .expect("virtual time overflow when scheduling");
        self.scheduler.schedule(at, kind)
    }

    /// Cancel a pending event (lazy, best-effort).
    pub fn cancel(&mut self, id: EventId) {
        self.scheduler.cancel(id);
    }

    /// Number of pending events in the scheduler.
    pub fn pending_count(&self) -> usize {
        self.scheduler.len()
    }
}

// ── Simulation ────────────────────────────────────────────────────────

/// Top-level simulation driver.
///
/// Owns the scheduler and the clock. `run_until` executes every event
/// inside the virtual-time budget; `step` advances by exactly one event.
#[derive(Debug, Default)]
pub struct Simulation {
    scheduler: Scheduler,
    now: VirtualTime,
    events_processed: u64,
    trace: Option<EventTrace>,
}

impl Simulation {
    /// Create a new simulation starting at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Total events processed so far.
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Events discarded by lazy cancellation so far.
    pub fn events_cancelled(&self) -> u64 {
        self.scheduler.cancelled_count()
    }

    /// Start recording every dispatched event.
    pub fn enable_tracing(&mut self) {
        self.trace = Some(EventTrace::new());
    }

    /// The recorded trace, if tracing is enabled.
    pub fn trace(&self) -> Option<&EventTrace> {
        self.trace.as_ref()
    }

    /// Schedule an event at an absolute time before or between runs.
    pub fn schedule(&mut self, at: VirtualTime, kind: EventKind) -> EventId {
        self.scheduler.schedule(at, kind)
    }

    /// Borrow a scheduling context at the current time, for seeding
    /// events outside the dispatch loop.
    pub fn context(&mut self) -> SimulationContext<'_> {
        SimulationContext {
            scheduler: &mut self.scheduler,
            now: self.now,
        }
    }

    /// Cancel a pending event (lazy, best-effort).
    pub fn cancel(&mut self, id: EventId) {
        self.scheduler.cancel(id);
    }

    /// Returns `true` if there are no more live events to process.
    pub fn is_finished(&mut self) -> bool {
        self.scheduler.is_empty()
    }

    /// Fire time of the next live event, if any.
    pub fn next_event_at(&mut self) -> Option<VirtualTime> {
        self.scheduler.peek_next().map(|e| e.at)
    }

    /// Number of pending events.
    pub fn pending_count(&self) -> usize {
        self.scheduler.len()
    }

    /// Execute a single step: pop one event, advance time, dispatch.
    ///
    /// Returns `Some(event)` if an event was processed, `None` if the
    /// queue is empty.
    pub fn step(&mut self, handler: &mut dyn EventHandler) -> Option<Event> {
        let event = self.scheduler.pop_next()?;

        // Virtual time never goes backward.
        assert!(
            event.at >= self.now,
            "time went backward: now={}, event={}",
            self.now,
            event.at
        );
        self.now = event.at;
        self.events_processed += 1;
        trace!(seq = event.id.raw(), at = event.at.as_micros(), kind = %event.kind, "dispatch");

        if let Some(trace) = &mut self.trace {
            trace.record(&event);
        }

        let mut ctx = SimulationContext {
            scheduler: &mut self.scheduler,
            now: self.now,
        };
        handler.handle(&mut ctx, &event);

        Some(event)
    }

    /// Run every event scheduled at or before `t_max`, leaving later
    /// events queued. Returns the number of events processed.
    pub fn run_until(&mut self, t_max: VirtualTime, handler: &mut dyn EventHandler) -> u64 {
        let start = self.events_processed;
        loop {
            let next_at = match self.scheduler.peek_next() {
                Some(next) => next.at,
                None => break,
            };
            if next_at > t_max {
                break;
            }
            self.step(handler);
        }
        self.events_processed - start
    }

    /// Run until the event queue is empty.
    pub fn run(&mut self, handler: &mut dyn EventHandler) -> u64 {
        let start = self.events_processed;
        while self.step(handler).is_some() {}
        self.events_processed - start
    }
}
