//! Virtual time for the deterministic simulation.
//!
//! Represents a logical timestamp in microseconds with no dependency on
//! `std::time`. Time advances only when the simulation processes events,
//! never from wall-clock observation. Configuration is expressed in
//! seconds and converted once at the boundary.

use serde::{Deserialize, Serialize};

/// A point in simulation time, in microseconds since simulation start.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct VirtualTime(u64);

impl VirtualTime {
    /// The zero-point of simulation time.
    pub const ZERO: VirtualTime = VirtualTime(0);

    /// Create a `VirtualTime` from a raw microsecond value.
    #[inline]
    pub fn from_micros(micros: u64) -> Self {
        VirtualTime(micros)
    }

    /// Convert a duration in seconds to a `VirtualTime` offset.
    ///
    /// # Panics
    /// Panics if `secs` is negative or not finite (configuration is
    /// validated before any conversion happens).
    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        assert!(
            secs.is_finite() && secs >= 0.0,
            "virtual time must be a finite non-negative number of seconds, got {secs}"
        );
        VirtualTime((secs * 1_000_000.0).round() as u64)
    }

    /// Return the raw microsecond value.
    #[inline]
    pub fn as_micros(self) -> u64 {
        self.0
    }

    /// Return the time as fractional seconds (for status snapshots).
    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Advance time by `delta` microseconds.
    /// Returns `None` on overflow (should never happen in practice).
    #[inline]
    pub fn advance(self, delta: u64) -> Option<VirtualTime> {
        self.0.checked_add(delta).map(VirtualTime)
    }

    /// The absolute time `delay` microseconds after `self`.
    /// Alias for `advance`, reads better at scheduling call-sites.
    #[inline]
    pub fn plus(self, delay: u64) -> Option<VirtualTime> {
        self.advance(delay)
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[inline]
    pub fn is_before(self, other: VirtualTime) -> bool {
        self.0 < other.0
    }

    /// Duration in microseconds between two points in time.
    /// Returns `None` if `other` is after `self`.
    #[inline]
    pub fn duration_since(self, other: VirtualTime) -> Option<u64> {
        self.0.checked_sub(other.0)
    }
}

impl std::fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T={}us", self.0)
    }
}
