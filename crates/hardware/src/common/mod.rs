//! Common types shared by every coherence component.
//!
//! This module provides the fundamental building blocks used across the caches,
//! the coherence state machines and the simulation harness. It includes:
//! 1. **Address Types:** Strong types for physical addresses and network node identifiers.
//! 2. **Error Handling:** The crate-wide error enum and the FSM rejection type.

/// Address and node identifier definitions.
pub mod addr;

/// Error types for configuration, protocol and harness failures.
pub mod error;

pub use addr::{NodeId, PhysAddr};
pub use error::{CoherenceError, Result, UnexpectedEvent};
