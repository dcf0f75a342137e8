//! Simulation harness.
//!
//! Provides the pieces needed to drive the caches end to end: a shared clock, memory
//! controller endpoints, the system that wires every node to a fixed-latency network,
//! and trace or synthetic workloads for the processors.

/// Shared simulation clock.
pub mod clock;

/// Memory controllers attached to the network.
pub mod memory;

/// Node wiring, network and per-cycle driver.
pub mod system;

/// Trace parsing and synthetic access streams.
pub mod workload;

pub use clock::SimClock;
pub use system::System;
pub use workload::{SyntheticWorkload, TraceEntry, load_trace, parse_trace};
