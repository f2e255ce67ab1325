//! # Quorum: a deterministic Raft consensus simulator
//!
//! An event-driven simulator of the Raft protocol over a configurable
//! lossy network. No async, no threads, no wall-clock time: pure state
//! machines driven by a virtual clock, so every run is reproducible
//! from its seed.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────┐
//! │        Simulator           │ ← control surface (start/status/…)
//! │  ┌─────────────────────┐  │
//! │  │      Cluster         │  │ ← routes events, owns the PRNG
//! │  │  ┌───────────────┐  │  │
//! │  │  │  RaftNode × N  │  │  │ ← per-node state machines
//! │  │  └───────────────┘  │  │
//! │  │  ┌───────────────┐  │  │
//! │  │  │    Network     │  │  │ ← drops, delays, partitions
//! │  │  └───────────────┘  │  │
//! │  └─────────────────────┘  │
//! │  ┌─────────────────────┐  │
//! │  │     Simulation       │  │ ← event loop, virtual clock
//! │  │  ┌───────────────┐  │  │
//! │  │  │   Scheduler    │  │  │ ← deterministic min-heap
//! │  │  └───────────────┘  │  │
//! │  └─────────────────────┘  │
//! └───────────────────────────┘
//! ```

pub mod cluster;
pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod fault;
pub mod invariants;
pub mod log;
pub mod message;
pub mod network;
pub mod raft;
pub mod scheduler;
pub mod simulation;
pub mod time;
pub mod trace;

// Re-exports for convenience.
pub use cluster::{Cluster, ClusterStats};
pub use config::{ChaosScenario, SimConfig, Timing};
pub use control::{NodeStatus, SimStatus, Simulator, StepResult};
pub use error::SimError;
pub use event::{Event, EventId, EventKind};
pub use fault::{FaultInjector, FaultKind};
pub use log::{LogEntry, RaftLog};
pub use message::Message;
pub use network::{NetStats, Network, NetworkConfig, PartitionId};
pub use raft::{NodeId, RaftNode, Role};
pub use scheduler::Scheduler;
pub use simulation::{EventHandler, Simulation, SimulationContext};
pub use time::VirtualTime;
pub use trace::{traces_match, EventTrace};
