//! Shared simulation clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle to the current simulation cycle.
///
/// Cloned into every component at construction; the harness advances it. Components
/// read it when timestamping responses, outgoing packets and stalls.
#[derive(Clone, Debug, Default)]
pub struct SimClock {
    cycle: Arc<AtomicU64>,
}

impl SimClock {
    /// Creates a clock at cycle 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cycle.
    pub fn now(&self) -> u64 {
        self.cycle.load(Ordering::Relaxed)
    }

    /// Advances one cycle and returns the new cycle.
    pub fn advance(&self) -> u64 {
        self.cycle.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Moves to an absolute cycle (tests).
    pub fn set(&self, cycle: u64) {
        self.cycle.store(cycle, Ordering::Relaxed);
    }
}
