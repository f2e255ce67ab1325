//! Fault injection.
//!
//! The injector never touches nodes or the network directly: every
//! fault is a `FaultToggle` event placed on the scheduler, applied by
//! the cluster runtime when its time comes. That keeps injected faults
//! inside the deterministic event order and inside the trace.

use serde::{Deserialize, Serialize};

use crate::config::ChaosScenario;
use crate::event::{EventId, EventKind};
use crate::raft::NodeId;
use crate::simulation::Simulation;
use crate::time::VirtualTime;

// ── FaultKind ─────────────────────────────────────────────────────────

/// One liveness or connectivity toggle.
///
/// `CrashLeader` and `IsolateLeader` name their target indirectly; the
/// cluster resolves "the leader" when the event fires, not when it is
/// scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// Take a node down. Crashed nodes neither send, receive, nor
    /// time out.
    Crash(NodeId),
    /// Bring a crashed node back as a follower.
    Recover(NodeId),
    /// Crash whichever node leads when the event fires.
    CrashLeader,
    /// Partition the current leader away from everyone else.
    IsolateLeader,
    /// Split the cluster into the given groups.
    Partition(Vec<Vec<NodeId>>),
    /// Return every node to a single partition.
    Heal,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::Crash(node) => write!(f, "Crash({node})"),
            FaultKind::Recover(node) => write!(f, "Recover({node})"),
            FaultKind::CrashLeader => write!(f, "CrashLeader"),
            FaultKind::IsolateLeader => write!(f, "IsolateLeader"),
            FaultKind::Partition(groups) => write!(f, "Partition({} groups)", groups.len()),
            FaultKind::Heal => write!(f, "Heal"),
        }
    }
}

// ── FaultInjector ─────────────────────────────────────────────────────

/// Schedules fault toggles at preset virtual times.
pub struct FaultInjector;

impl FaultInjector {
    /// Crash `node` at `at`.
    pub fn crash_at(sim: &mut Simulation, node: NodeId, at: VirtualTime) -> EventId {
        sim.schedule(
            at,
            EventKind::FaultToggle {
                fault: FaultKind::Crash(node),
            },
        )
    }

    /// Recover `node` at `at`.
    pub fn recover_at(sim: &mut Simulation, node: NodeId, at: VirtualTime) -> EventId {
        sim.schedule(
            at,
            EventKind::FaultToggle {
                fault: FaultKind::Recover(node),
            },
        )
    }

    /// Crash the then-current leader at `at`.
    pub fn crash_leader_at(sim: &mut Simulation, at: VirtualTime) -> EventId {
        sim.schedule(
            at,
            EventKind::FaultToggle {
                fault: FaultKind::CrashLeader,
            },
        )
    }

    /// Partition the cluster into `groups` at `at`.
    pub fn partition_at(
        sim: &mut Simulation,
        groups: Vec<Vec<NodeId>>,
        at: VirtualTime,
    ) -> EventId {
        sim.schedule(
            at,
            EventKind::FaultToggle {
                fault: FaultKind::Partition(groups),
            },
        )
    }

    /// Heal all partitions at `at`.
    pub fn heal_at(sim: &mut Simulation, at: VirtualTime) -> EventId {
        sim.schedule(
            at,
            EventKind::FaultToggle {
                fault: FaultKind::Heal,
            },
        )
    }

    /// Schedule one of the prebuilt recipes over a cluster of `nodes`
    /// nodes and a run of `max_time`.
    pub fn apply_scenario(
        sim: &mut Simulation,
        scenario: ChaosScenario,
        nodes: usize,
        max_time: VirtualTime,
    ) {
        let budget = max_time.as_micros();
        match scenario {
            ChaosScenario::LeaderFailure => {
                Self::crash_leader_at(sim, VirtualTime::from_micros(budget / 3));
            }

            ChaosScenario::RollingFailures => {
                // One node down at a time: node i is out during
                // [(i+1)*slot, (i+2)*slot).
                let slot = budget / (nodes as u64 + 2);
                for i in 0..nodes as u64 {
                    let node = NodeId::new(i);
                    Self::crash_at(sim, node, VirtualTime::from_micros((i + 1) * slot));
                    Self::recover_at(sim, node, VirtualTime::from_micros((i + 2) * slot));
                }
            }

            ChaosScenario::SplitBrain => {
                sim.schedule(
                    VirtualTime::from_micros(budget / 3),
                    EventKind::FaultToggle {
                        fault: FaultKind::IsolateLeader,
                    },
                );
                Self::heal_at(sim, VirtualTime::from_micros(budget * 2 / 3));
            }

            ChaosScenario::NetworkPartition => {
                let split = nodes / 2;
                let minority: Vec<NodeId> = (0..split as u64).map(NodeId::new).collect();
                let majority: Vec<NodeId> =
                    (split as u64..nodes as u64).map(NodeId::new).collect();
                Self::partition_at(
                    sim,
                    vec![minority, majority],
                    VirtualTime::from_micros(budget / 3),
                );
                Self::heal_at(sim, VirtualTime::from_micros(budget * 2 / 3));
            }
        }
    }
}
