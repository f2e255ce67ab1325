//! Cluster runtime: the arena of nodes, the network, and the single
//! PRNG, wired into the event loop.
//!
//! The cluster implements `EventHandler` and routes every popped event:
//! `Send` goes through the network fault model, `Deliver` and the timer
//! events go to their node, `FaultToggle` mutates liveness or partition
//! membership, `ClientSubmit` finds the current leader. Components
//! refer to each other only through `NodeId` indices; there are no
//! cross-references between nodes.
//!
//! The runtime also keeps the leader-per-term registry. Two different
//! leaders in one term is a protocol-safety bug, so recording a second
//! one aborts the run immediately.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{SimConfig, Timing};
use crate::event::{Event, EventKind};
use crate::fault::FaultKind;
use crate::network::{NetDecision, Network};
use crate::raft::{NodeCtx, NodeId, RaftNode, Role};
use crate::simulation::{EventHandler, Simulation, SimulationContext};

// ── Stats ─────────────────────────────────────────────────────────────

/// Cluster-level observable counters. Network counters live in
/// `NetStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStats {
    /// Sends or deliveries discarded because an endpoint was crashed.
    pub dropped_crashed: u64,
    /// Fired timers discarded because their generation had moved on.
    pub stale_timers: u64,
    /// Client commands that reached a leader.
    pub commands_accepted: u64,
    /// Client commands that fired with no elected leader.
    pub commands_rejected: u64,
}

// ── Cluster ───────────────────────────────────────────────────────────

/// The simulated Raft cluster.
pub struct Cluster {
    nodes: Vec<RaftNode>,
    network: Network,
    rng: ChaCha8Rng,
    timing: Timing,
    leaders_by_term: BTreeMap<u64, NodeId>,
    stats: ClusterStats,
}

impl Cluster {
    /// Build a cluster from a validated config. Nodes start alive, as
    /// followers at term 0 with empty logs.
    pub fn new(config: &SimConfig) -> Self {
        let nodes = (0..config.nodes as u64)
            .map(|i| RaftNode::new(NodeId::new(i), config.nodes))
            .collect();
        Cluster {
            nodes,
            network: Network::new(config.network_config()),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            timing: config.timing(),
            leaders_by_term: BTreeMap::new(),
            stats: ClusterStats::default(),
        }
    }

    /// Arm every node's initial election timer, in node order.
    pub fn start(&mut self, sim: &mut Simulation) {
        let mut ctx = sim.context();
        for node in &mut self.nodes {
            let mut nctx = NodeCtx {
                sim: &mut ctx,
                rng: &mut self.rng,
                timing: &self.timing,
            };
            node.start(&mut nctx);
        }
    }

    // ── Inspection ────────────────────────────────────────────────

    /// All nodes, indexed by `NodeId`.
    pub fn nodes(&self) -> &[RaftNode] {
        &self.nodes
    }

    /// One node by id.
    pub fn node(&self, id: NodeId) -> Option<&RaftNode> {
        self.nodes.get(id.index())
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cluster is empty (it never is after construction).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The alive leader of the highest term, if any.
    pub fn current_leader(&self) -> Option<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.alive() && n.role() == Role::Leader)
            .max_by_key(|n| n.current_term())
            .map(|n| n.id())
    }

    /// Highest term any node has seen.
    pub fn highest_term(&self) -> u64 {
        self.nodes.iter().map(|n| n.current_term()).max().unwrap_or(0)
    }

    /// Every `(term, leader)` pair observed so far.
    pub fn leaders_by_term(&self) -> &BTreeMap<u64, NodeId> {
        &self.leaders_by_term
    }

    /// Total elections started across the cluster.
    pub fn elections_started(&self) -> u64 {
        self.nodes.iter().map(|n| n.elections_started()).sum()
    }

    /// Total replication rejections (and hence backoff retries) seen by
    /// leaders.
    pub fn append_rejections(&self) -> u64 {
        self.nodes.iter().map(|n| n.append_rejections()).sum()
    }

    /// Cluster-level counters.
    pub fn stats(&self) -> ClusterStats {
        self.stats
    }

    /// The network layer.
    pub fn network(&self) -> &Network {
        &self.network
    }

    // ── Internals ─────────────────────────────────────────────────

    /// Record a leadership claim, aborting on an election-safety
    /// breach. Called after every node dispatch.
    fn note_leadership(&mut self, id: NodeId) {
        let node = &self.nodes[id.index()];
        if node.role() != Role::Leader {
            return;
        }
        let term = node.current_term();
        match self.leaders_by_term.get(&term) {
            Some(&prev) if prev != id => panic!(
                "election safety violated: {prev} and {id} both claim leadership of term {term}"
            ),
            Some(_) => {}
            None => {
                self.leaders_by_term.insert(term, id);
            }
        }
    }

    fn crash_node(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.index()];
        if node.alive() {
            node.crash();
        }
    }

    fn apply_fault(&mut self, ctx: &mut SimulationContext, fault: FaultKind) {
        match fault {
            FaultKind::Crash(node) => self.crash_node(node),

            FaultKind::Recover(node) => {
                if !self.nodes[node.index()].alive() {
                    let mut nctx = NodeCtx {
                        sim: ctx,
                        rng: &mut self.rng,
                        timing: &self.timing,
                    };
                    self.nodes[node.index()].recover(&mut nctx);
                }
            }

            FaultKind::CrashLeader => match self.current_leader() {
                Some(leader) => self.crash_node(leader),
                None => debug!("crash-leader fault fired with no leader in place"),
            },

            FaultKind::IsolateLeader => match self.current_leader() {
                Some(leader) => {
                    let rest: Vec<NodeId> = self
                        .nodes
                        .iter()
                        .map(|n| n.id())
                        .filter(|&id| id != leader)
                        .collect();
                    info!(%leader, "isolating leader in a minority partition");
                    self.network.partition(&[vec![leader], rest]);
                }
                None => debug!("isolate-leader fault fired with no leader in place"),
            },

            FaultKind::Partition(groups) => {
                info!(groups = groups.len(), "network partitioned");
                self.network.partition(&groups);
            }

            FaultKind::Heal => {
                info!("network healed");
                self.network.heal();
            }
        }
    }
}

impl EventHandler for Cluster {
    fn handle(&mut self, ctx: &mut SimulationContext, event: &Event) {
        match &event.kind {
            EventKind::Send { from, to, msg } => {
                let (from, to) = (*from, *to);
                // Crashed endpoints drop silently before the network
                // even looks at the message.
                if !self.nodes[from.index()].alive() || !self.nodes[to.index()].alive() {
                    self.stats.dropped_crashed += 1;
                    return;
                }
                for decision in self.network.process(from, to, &mut self.rng) {
                    let delay = match decision {
                        NetDecision::Deliver { delay }
                        | NetDecision::DeliverDuplicate { delay } => delay,
                        NetDecision::DroppedByPartition | NetDecision::DroppedByChance => {
                            continue
                        }
                    };
                    ctx.schedule_after(
                        delay,
                        EventKind::Deliver {
                            from,
                            to,
                            msg: msg.clone(),
                        },
                    );
                }
            }

            EventKind::Deliver { from, to, msg } => {
                let (from, to) = (*from, *to);
                // The receiver may have crashed while the message was
                // in flight.
                if !self.nodes[to.index()].alive() {
                    self.stats.dropped_crashed += 1;
                    return;
                }
                let mut nctx = NodeCtx {
                    sim: ctx,
                    rng: &mut self.rng,
                    timing: &self.timing,
                };
                self.nodes[to.index()].on_message(&mut nctx, from, msg.clone());
                self.note_leadership(to);
            }

            EventKind::ElectionTimeout { node, generation } => {
                let node = *node;
                if !self.nodes[node.index()].alive() {
                    return;
                }
                if *generation != self.nodes[node.index()].timer_generation() {
                    self.stats.stale_timers += 1;
                    return;
                }
                let mut nctx = NodeCtx {
                    sim: ctx,
                    rng: &mut self.rng,
                    timing: &self.timing,
                };
                self.nodes[node.index()].on_election_timeout(&mut nctx);
                self.note_leadership(node);
            }

            EventKind::HeartbeatTick { node, generation } => {
                let node = *node;
                if !self.nodes[node.index()].alive() {
                    return;
                }
                if *generation != self.nodes[node.index()].timer_generation() {
                    self.stats.stale_timers += 1;
                    return;
                }
                let mut nctx = NodeCtx {
                    sim: ctx,
                    rng: &mut self.rng,
                    timing: &self.timing,
                };
                self.nodes[node.index()].on_heartbeat_tick(&mut nctx);
            }

            EventKind::FaultToggle { fault } => {
                self.apply_fault(ctx, fault.clone());
            }

            EventKind::ClientSubmit { command } => match self.current_leader() {
                Some(leader) => {
                    let mut nctx = NodeCtx {
                        sim: ctx,
                        rng: &mut self.rng,
                        timing: &self.timing,
                    };
                    if self.nodes[leader.index()].on_client_command(&mut nctx, command.clone()) {
                        self.stats.commands_accepted += 1;
                    } else {
                        self.stats.commands_rejected += 1;
                    }
                }
                None => {
                    debug!("client command fired with no leader in place, rejected");
                    self.stats.commands_rejected += 1;
                }
            },
        }
    }
}
