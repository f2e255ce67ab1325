//! Structured error types.
//!
//! Configuration and control-surface misuse are the only recoverable
//! errors the simulator surfaces; protocol rejections are ordinary
//! replies and fault-model drops are silent, counted behavior.
//! Invariant breaches are programmer errors and abort the run (see
//! `invariants`).

use thiserror::Error;

use crate::raft::NodeId;

/// Errors surfaced by the control surface.
#[derive(Debug, Error)]
pub enum SimError {
    /// A configuration bound is violated. Fatal at start.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A fault or submission referenced a node outside the cluster.
    #[error("node {0} does not exist")]
    NodeNotFound(NodeId),

    /// Status or trace serialization failed.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Trace export could not be written.
    #[error("trace export failed: {0}")]
    TraceExport(#[from] std::io::Error),
}
