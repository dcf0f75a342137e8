//! Two-level MESI cache coherence simulator.
//!
//! This crate models private L1 caches kept coherent by shared L2 banks acting as
//! directories, with the following:
//! 1. **Coherence:** Per-line client and manager state machines and their messages.
//! 2. **Caches:** Tag store, replacement, MSHR, stall buffer and credit-controlled ports
//!    around those state machines.
//! 3. **Network:** Packet envelopes and address-interleaved destination maps.
//! 4. **Simulation:** Clock, memory controllers, system wiring and workloads.
//! 5. **Configuration and statistics:** JSON-loadable geometry and per-node counters.

/// Caches (tag store, policies, MSHR, stall buffer, L1, L2).
pub mod cache;
/// MESI state machines and message types.
pub mod coherence;
/// Common types (addresses, node ids, errors).
pub mod common;
/// Simulator configuration (defaults, enums, hierarchical config structures).
pub mod config;
/// Packets, ports and destination maps.
pub mod net;
/// Clock, memory nodes, system harness and workloads.
pub mod sim;
/// Per-cache statistics collection and reporting.
pub mod stats;

/// Cache of either level, dispatched by tag.
pub use crate::cache::CacheNode;
/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Complete simulated hierarchy; construct with `System::new`.
pub use crate::sim::System;
