//! Simulation configuration.
//!
//! All knobs are expressed in seconds and probabilities, the way they
//! arrive from the CLI; they are validated once and converted to
//! microsecond `Timing` / `NetworkConfig` values at cluster build time.
//! Bad bounds are fatal at start, never mid-run.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::network::NetworkConfig;
use crate::time::VirtualTime;

// ── Chaos scenarios ───────────────────────────────────────────────────

/// Prebuilt fault recipes composed from the injector primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ChaosScenario {
    /// Crash whoever leads at one third of the run.
    LeaderFailure,
    /// Crash and recover each node in turn, one at a time.
    RollingFailures,
    /// Isolate the current leader in a minority partition, then heal.
    SplitBrain,
    /// Split the cluster into two static halves, then heal.
    NetworkPartition,
}

// ── Timing ────────────────────────────────────────────────────────────

/// Protocol timing in microseconds of virtual time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Lower election timeout bound.
    pub election_min: u64,
    /// Upper election timeout bound.
    pub election_max: u64,
    /// Leader heartbeat interval.
    pub heartbeat: u64,
}

// ── SimConfig ─────────────────────────────────────────────────────────

/// Every recognized configuration option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Cluster size N.
    pub nodes: usize,
    /// Virtual time budget in seconds.
    pub max_time: f64,
    /// PRNG seed; the determinism key.
    pub seed: u64,
    /// Per-message drop probability in `[0, 1]`.
    pub message_drop_rate: f64,
    /// Lower bound of the delivery delay window, seconds.
    pub message_delay_min: f64,
    /// Upper bound of the delivery delay window, seconds.
    pub message_delay_max: f64,
    /// Probability of a second delivery in `[0, 1]`.
    pub duplicate_rate: f64,
    /// Extra uniform jitter on top of the delay window, seconds.
    pub jitter: f64,
    /// Lower election timeout bound, seconds.
    pub election_timeout_min: f64,
    /// Upper election timeout bound, seconds.
    pub election_timeout_max: f64,
    /// Leader heartbeat cadence, seconds.
    pub heartbeat_interval: f64,
    /// Whether to run the configured chaos scenario.
    pub chaos: bool,
    /// Which scenario `chaos` runs.
    pub chaos_scenario: ChaosScenario,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            nodes: 5,
            max_time: 60.0,
            seed: 42,
            message_drop_rate: 0.05,
            message_delay_min: 0.01,
            message_delay_max: 0.1,
            duplicate_rate: 0.0,
            jitter: 0.0,
            election_timeout_min: 0.15,
            election_timeout_max: 0.3,
            heartbeat_interval: 0.05,
            chaos: false,
            chaos_scenario: ChaosScenario::NetworkPartition,
        }
    }
}

impl SimConfig {
    /// Check every bound. Called by the simulator before anything is
    /// built; a violation here surfaces to the caller and nothing runs.
    pub fn validate(&self) -> Result<(), SimError> {
        fn probability(name: &str, v: f64) -> Result<(), SimError> {
            if !(0.0..=1.0).contains(&v) || !v.is_finite() {
                return Err(SimError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {v}"
                )));
            }
            Ok(())
        }
        fn non_negative(name: &str, v: f64) -> Result<(), SimError> {
            if !v.is_finite() || v < 0.0 {
                return Err(SimError::InvalidConfig(format!(
                    "{name} must be a finite non-negative number, got {v}"
                )));
            }
            Ok(())
        }

        if self.nodes < 3 {
            return Err(SimError::InvalidConfig(format!(
                "nodes must be at least 3, got {}",
                self.nodes
            )));
        }
        if !self.max_time.is_finite() || self.max_time <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "max_time must be positive, got {}",
                self.max_time
            )));
        }
        probability("message_drop_rate", self.message_drop_rate)?;
        probability("duplicate_rate", self.duplicate_rate)?;
        non_negative("message_delay_min", self.message_delay_min)?;
        non_negative("message_delay_max", self.message_delay_max)?;
        non_negative("jitter", self.jitter)?;
        if self.message_delay_min > self.message_delay_max {
            return Err(SimError::InvalidConfig(format!(
                "message_delay_min ({}) exceeds message_delay_max ({})",
                self.message_delay_min, self.message_delay_max
            )));
        }
        non_negative("election_timeout_min", self.election_timeout_min)?;
        if self.election_timeout_min <= 0.0 {
            return Err(SimError::InvalidConfig(
                "election_timeout_min must be positive".into(),
            ));
        }
        if self.election_timeout_min > self.election_timeout_max {
            return Err(SimError::InvalidConfig(format!(
                "election_timeout_min ({}) exceeds election_timeout_max ({})",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if !self.heartbeat_interval.is_finite() || self.heartbeat_interval <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "heartbeat_interval must be positive, got {}",
                self.heartbeat_interval
            )));
        }
        Ok(())
    }

    /// Protocol timing in microseconds.
    pub fn timing(&self) -> Timing {
        Timing {
            election_min: VirtualTime::from_secs_f64(self.election_timeout_min).as_micros(),
            election_max: VirtualTime::from_secs_f64(self.election_timeout_max).as_micros(),
            heartbeat: VirtualTime::from_secs_f64(self.heartbeat_interval).as_micros(),
        }
    }

    /// Network fault model in microseconds.
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            drop_rate: self.message_drop_rate,
            duplicate_rate: self.duplicate_rate,
            delay_min: VirtualTime::from_secs_f64(self.message_delay_min).as_micros(),
            delay_max: VirtualTime::from_secs_f64(self.message_delay_max).as_micros(),
            jitter: VirtualTime::from_secs_f64(self.jitter).as_micros(),
        }
    }

    /// The virtual time budget.
    pub fn max_virtual_time(&self) -> VirtualTime {
        VirtualTime::from_secs_f64(self.max_time)
    }
}
