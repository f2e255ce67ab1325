//! Simulated network layer with deterministic fault injection.
//!
//! Every `Send` event passes through the `Network` before becoming zero,
//! one, or two `Deliver` events. The layer applies partitions, random
//! drops, a uniform delay window with jitter, and optional duplication.
//! All randomness comes from the single cluster-owned PRNG, consumed in
//! dispatch order, so every run with the same seed behaves identically.
//!
//! Delivery is deliberately **not** FIFO: a later send may draw a
//! shorter delay and arrive first. Raft tolerates this through term
//! checks and the `prev_log_index` consistency probe.

use std::collections::BTreeMap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::raft::NodeId;

// ── Partition ID ──────────────────────────────────────────────────────

/// Equivalence class of nodes that can communicate. Two nodes exchange
/// messages iff they share a `PartitionId`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PartitionId(u32);

impl PartitionId {
    /// The partition every node starts in (and returns to on heal).
    pub const MAIN: PartitionId = PartitionId(0);

    /// Wrap a raw group number.
    pub fn new(raw: u32) -> Self {
        PartitionId(raw)
    }
}

// ── Network Config ────────────────────────────────────────────────────

/// Fault-model knobs for the simulated network. Delays are in
/// microseconds of virtual time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-message drop probability in `[0, 1]`.
    pub drop_rate: f64,
    /// Probability of scheduling a second, later delivery.
    pub duplicate_rate: f64,
    /// Lower bound of the uniform delay window.
    pub delay_min: u64,
    /// Upper bound of the uniform delay window.
    pub delay_max: u64,
    /// Extra uniform jitter in `[0, jitter]` on top of the window.
    pub jitter: u64,
}

impl NetworkConfig {
    /// A perfectly reliable network: fixed 1us latency, no drops.
    pub fn reliable() -> Self {
        NetworkConfig {
            drop_rate: 0.0,
            duplicate_rate: 0.0,
            delay_min: 1,
            delay_max: 1,
            jitter: 0,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::reliable()
    }
}

// ── Decisions and counters ────────────────────────────────────────────

/// The fate of one send attempt, possibly one of several.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetDecision {
    /// Primary copy delivered after `delay` microseconds.
    Deliver { delay: u64 },
    /// Duplicate copy delivered after `delay` microseconds.
    DeliverDuplicate { delay: u64 },
    /// Dropped because sender and receiver are in different partitions.
    DroppedByPartition,
    /// Dropped by the random-loss draw.
    DroppedByChance,
}

/// Observable network counters. Drops are expected behavior, never
/// errors, but they must stay countable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetStats {
    pub sends: u64,
    pub delivered: u64,
    pub duplicated: u64,
    pub dropped_partition: u64,
    pub dropped_chance: u64,
}

// ── Network ───────────────────────────────────────────────────────────

/// The lossy network: fault model plus partition membership.
#[derive(Debug, Clone, Default)]
pub struct Network {
    config: NetworkConfig,
    /// Nodes absent from the map are in `PartitionId::MAIN`.
    partitions: BTreeMap<NodeId, PartitionId>,
    stats: NetStats,
}

impl Network {
    /// Create a network with the given fault model.
    pub fn new(config: NetworkConfig) -> Self {
        Network {
            config,
            partitions: BTreeMap::new(),
            stats: NetStats::default(),
        }
    }

    // ── Partition management ──────────────────────────────────────

    /// Split the cluster into the given groups. Group `i` becomes
    /// partition `i + 1`; nodes not named fall back to the main
    /// partition.
    pub fn partition(&mut self, groups: &[Vec<NodeId>]) {
        self.partitions.clear();
        for (i, group) in groups.iter().enumerate() {
            let pid = PartitionId::new(i as u32 + 1);
            for &node in group {
                self.partitions.insert(node, pid);
            }
        }
    }

    /// Return every node to the common partition.
    pub fn heal(&mut self) {
        self.partitions.clear();
    }

    /// The partition a node currently belongs to.
    pub fn partition_of(&self, node: NodeId) -> PartitionId {
        self.partitions
            .get(&node)
            .copied()
            .unwrap_or(PartitionId::MAIN)
    }

    /// Whether `from` can currently reach `to`.
    pub fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        self.partition_of(from) == self.partition_of(to)
    }

    // ── Delivery policy ───────────────────────────────────────────

    /// Decide the fate of one send.
    ///
    /// Applies the policy in order: partition check, random drop,
    /// delay draw, optional duplicate. Crashed-endpoint drops happen
    /// before this call, in the cluster runtime. Every random decision
    /// consumes the shared PRNG in a fixed order.
    pub fn process(
        &mut self,
        from: NodeId,
        to: NodeId,
        rng: &mut ChaCha8Rng,
    ) -> Vec<NetDecision> {
        self.stats.sends += 1;

        if !self.can_reach(from, to) {
            self.stats.dropped_partition += 1;
            trace!(%from, %to, "dropped: partition");
            return vec![NetDecision::DroppedByPartition];
        }

        let r: f64 = rng.gen();
        if r < self.config.drop_rate {
            self.stats.dropped_chance += 1;
            trace!(%from, %to, "dropped: chance");
            return vec![NetDecision::DroppedByChance];
        }

        let delay = self.draw_delay(rng);
        self.stats.delivered += 1;
        let mut decisions = vec![NetDecision::Deliver { delay }];

        let dup: f64 = rng.gen();
        if dup < self.config.duplicate_rate {
            // Same distribution, nudged past the primary so the
            // duplicate is always the later copy.
            let mut dup_delay = self.draw_delay(rng);
            if dup_delay <= delay {
                dup_delay = delay + 1;
            }
            self.stats.duplicated += 1;
            decisions.push(NetDecision::DeliverDuplicate { delay: dup_delay });
        }

        trace!(%from, %to, ?decisions, "routed");
        decisions
    }

    fn draw_delay(&self, rng: &mut ChaCha8Rng) -> u64 {
        let base = rng.gen_range(self.config.delay_min..=self.config.delay_max);
        if self.config.jitter > 0 {
            base + rng.gen_range(0..=self.config.jitter)
        } else {
            base
        }
    }

    // ── Accessors ─────────────────────────────────────────────────

    /// Observable counters.
    pub fn stats(&self) -> NetStats {
        self.stats
    }

    /// The active fault model.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }
}
