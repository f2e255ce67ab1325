//! In-process control surface.
//!
//! `Simulator` bundles the event loop, the cluster, and the config
//! behind the operations an external driver (CLI, test harness, UI
//! glue) needs: start, stop, reset, status, submit, inject_fault, and
//! step-wise execution. The core opens no sockets and reads no files;
//! everything here is plain method calls.

use serde::Serialize;

use crate::cluster::{Cluster, ClusterStats};
use crate::config::SimConfig;
use crate::error::SimError;
use crate::event::EventKind;
use crate::fault::{FaultInjector, FaultKind};
use crate::network::NetStats;
use crate::raft::{NodeId, Role};
use crate::simulation::Simulation;
use crate::time::VirtualTime;
use crate::trace::EventTrace;

// ── Status snapshot ───────────────────────────────────────────────────

/// One node's externally visible state.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub id: u64,
    pub role: Role,
    pub term: u64,
    pub alive: bool,
    pub log_len: u64,
    pub commit_index: u64,
}

/// A point-in-time snapshot of the whole simulation.
#[derive(Debug, Clone, Serialize)]
pub struct SimStatus {
    pub nodes: Vec<NodeStatus>,
    pub leader_id: Option<u64>,
    pub term: u64,
    pub now: f64,
    pub events_processed: u64,
    pub elections_started: u64,
    pub append_rejections: u64,
    pub cluster: ClusterStats,
    pub network: NetStats,
}

/// Result of a single `step` call.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub seq: u64,
    pub at_micros: u64,
    pub description: String,
    pub total_events: u64,
}

// ── Simulator ─────────────────────────────────────────────────────────

/// The assembled simulator.
pub struct Simulator {
    config: SimConfig,
    sim: Simulation,
    cluster: Cluster,
    running: bool,
    tracing_enabled: bool,
}

impl Simulator {
    /// Validate the config, build the cluster, arm the initial timers,
    /// and schedule the chaos scenario if one is enabled. Nothing runs
    /// until `run` or `step`.
    pub fn start(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let mut sim = Simulation::new();
        let mut cluster = Cluster::new(&config);
        cluster.start(&mut sim);
        if config.chaos {
            FaultInjector::apply_scenario(
                &mut sim,
                config.chaos_scenario,
                config.nodes,
                config.max_virtual_time(),
            );
        }
        Ok(Simulator {
            config,
            sim,
            cluster,
            running: true,
            tracing_enabled: false,
        })
    }

    /// Record every dispatched event for replay verification. Must be
    /// called before any events run to capture the full trace.
    pub fn enable_tracing(&mut self) {
        self.tracing_enabled = true;
        self.sim.enable_tracing();
    }

    /// Drive the simulation to its virtual-time budget (or until the
    /// queue drains). Returns the number of events processed.
    pub fn run(&mut self) -> u64 {
        if !self.running {
            return 0;
        }
        let processed = self
            .sim
            .run_until(self.config.max_virtual_time(), &mut self.cluster);
        self.running = false;
        processed
    }

    /// Execute exactly one event, honoring the time budget. Returns
    /// `None` once the budget or the queue is exhausted.
    pub fn step(&mut self) -> Option<StepResult> {
        if !self.running {
            return None;
        }
        let at = match self.sim.next_event_at() {
            Some(at) if at <= self.config.max_virtual_time() => at,
            _ => {
                self.running = false;
                return None;
            }
        };
        debug_assert!(at >= self.sim.now());
        let event = self.sim.step(&mut self.cluster)?;
        Some(StepResult {
            seq: event.id.raw(),
            at_micros: event.at.as_micros(),
            description: event.kind.to_string(),
            total_events: self.sim.events_processed(),
        })
    }

    /// Halt the driver loop. Idempotent; already-scheduled events stay
    /// queued and `reset` or a new simulator is needed to continue.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Rebuild the whole simulation from the stored config. Idempotent:
    /// resetting twice leaves the same fresh state.
    pub fn reset(&mut self) {
        let mut sim = Simulation::new();
        if self.tracing_enabled {
            sim.enable_tracing();
        }
        let mut cluster = Cluster::new(&self.config);
        cluster.start(&mut sim);
        if self.config.chaos {
            FaultInjector::apply_scenario(
                &mut sim,
                self.config.chaos_scenario,
                self.config.nodes,
                self.config.max_virtual_time(),
            );
        }
        self.sim = sim;
        self.cluster = cluster;
        self.running = true;
    }

    /// Whether the driver loop is still live.
    pub fn is_running(&self) -> bool {
        self.running
    }

    // ── Commands and faults ───────────────────────────────────────

    /// Submit a client command at the current virtual time. It is
    /// routed to whichever node leads when the event fires.
    pub fn submit(&mut self, command: Vec<u8>) {
        self.sim
            .schedule(self.sim.now(), EventKind::ClientSubmit { command });
    }

    /// Submit a client command at an absolute virtual time.
    pub fn submit_at(&mut self, at_secs: f64, command: Vec<u8>) {
        let at = VirtualTime::from_secs_f64(at_secs).max(self.sim.now());
        self.sim.schedule(at, EventKind::ClientSubmit { command });
    }

    /// Schedule a fault at an absolute virtual time (clamped to now).
    /// Node-targeted faults are validated against the cluster.
    pub fn inject_fault(&mut self, fault: FaultKind, at_secs: f64) -> Result<(), SimError> {
        self.validate_fault(&fault)?;
        let at = VirtualTime::from_secs_f64(at_secs).max(self.sim.now());
        self.sim.schedule(at, EventKind::FaultToggle { fault });
        Ok(())
    }

    fn validate_fault(&self, fault: &FaultKind) -> Result<(), SimError> {
        let check = |id: NodeId| {
            if self.cluster.node(id).is_none() {
                Err(SimError::NodeNotFound(id))
            } else {
                Ok(())
            }
        };
        match fault {
            FaultKind::Crash(node) | FaultKind::Recover(node) => check(*node),
            FaultKind::Partition(groups) => {
                for group in groups {
                    for &node in group {
                        check(node)?;
                    }
                }
                Ok(())
            }
            FaultKind::CrashLeader | FaultKind::IsolateLeader | FaultKind::Heal => Ok(()),
        }
    }

    // ── Inspection ────────────────────────────────────────────────

    /// A structured snapshot of the current state.
    pub fn status(&self) -> SimStatus {
        let nodes = self
            .cluster
            .nodes()
            .iter()
            .map(|n| NodeStatus {
                id: n.id().raw(),
                role: n.role(),
                term: n.current_term(),
                alive: n.alive(),
                log_len: n.log().last_index(),
                commit_index: n.commit_index(),
            })
            .collect();
        SimStatus {
            nodes,
            leader_id: self.cluster.current_leader().map(NodeId::raw),
            term: self.cluster.highest_term(),
            now: self.sim.now().as_secs_f64(),
            events_processed: self.sim.events_processed(),
            elections_started: self.cluster.elections_started(),
            append_rejections: self.cluster.append_rejections(),
            cluster: self.cluster.stats(),
            network: self.cluster.network().stats(),
        }
    }

    /// The status snapshot as pretty JSON.
    pub fn status_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(&self.status())?)
    }

    /// The recorded trace, when tracing is enabled.
    pub fn trace(&self) -> Option<&EventTrace> {
        self.sim.trace()
    }

    /// The underlying cluster, for invariant checks and assertions.
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// The active configuration.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Current virtual time in seconds.
    pub fn now_secs(&self) -> f64 {
        self.sim.now().as_secs_f64()
    }

    /// Total events processed.
    pub fn events_processed(&self) -> u64 {
        self.sim.events_processed()
    }
}
