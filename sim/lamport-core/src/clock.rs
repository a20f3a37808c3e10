//! Logical time for a single machine.
//!
//! A [`LamportClock`] only ever moves forward. Local events and sends advance
//! it by one, receives jump past whatever timestamp arrived on the wire. The
//! [`ClockRate`] is the physical speed of the machine: how many ticks of its
//! event loop run per second of wall-clock time.

use rand::Rng;
use std::{fmt::Display, time::Duration};

/// A Lamport logical clock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LamportClock(u64);

impl LamportClock {
    /// Creates a clock starting at zero.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Reads the current logical time.
    pub fn now(&self) -> u64 {
        self.0
    }

    /// Advances the clock for a local or send event and returns the new value.
    /// The clock saturates at `u64::MAX` rather than wrapping.
    pub fn tick(&mut self) -> u64 {
        self.0 = self.0.saturating_add(1);
        self.0
    }

    /// Applies the receive rule, `max(local, remote) + 1`, and returns the new
    /// value. Saturates like [`tick`](LamportClock::tick).
    pub fn receive(&mut self, remote: u64) -> u64 {
        self.0 = self.0.max(remote).saturating_add(1);
        self.0
    }
}

impl From<LamportClock> for u64 {
    fn from(clock: LamportClock) -> Self {
        clock.0
    }
}

/// The number of event-loop ticks a machine runs per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockRate(u32);

impl ClockRate {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 6;

    /// Creates a rate, rejecting anything outside `[MIN, MAX]`.
    pub fn new(rate: u32) -> Result<Self, ClockRateError> {
        if (Self::MIN..=Self::MAX).contains(&rate) {
            Ok(Self(rate))
        } else {
            Err(ClockRateError(rate))
        }
    }

    /// Draws a rate uniformly from `[MIN, MAX]`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(Self::MIN..=Self::MAX))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// The wall-clock time between two ticks.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(1) / self.0
    }
}

impl Display for ClockRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
#[error("Clock rate {0} is outside of [{min}, {max}]", min = ClockRate::MIN, max = ClockRate::MAX)]
pub struct ClockRateError(pub u32);
