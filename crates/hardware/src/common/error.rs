//! Error types for the coherence engine.
//!
//! This module defines the crate-wide error type. It provides:
//! 1. **`CoherenceError`:** Configuration, geometry, protocol and harness failures.
//! 2. **`UnexpectedEvent`:** The context-free rejection returned by the state machines,
//!    which the owning cache promotes to a `ProtocolViolation` with node and line attached.
//!
//! Resource exhaustion is not an error: a request that cannot proceed is parked in
//! the stall buffer and retried, never reported as an error.

use thiserror::Error;

use super::addr::{NodeId, PhysAddr};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoherenceError>;

/// Errors produced by the coherence engine and its harness.
#[derive(Debug, Error)]
pub enum CoherenceError {
    /// A state machine received an event its transition table does not define.
    #[error("protocol violation at {node} for line {addr}: {event} in state {state}")]
    ProtocolViolation {
        /// Cache that detected the violation.
        node: NodeId,
        /// Line address the event targeted.
        addr: PhysAddr,
        /// State name at the time of the event.
        state: &'static str,
        /// Event name.
        event: &'static str,
    },

    /// A packet kind the receiving component never handles.
    #[error("{node} cannot handle {kind} packets")]
    UnexpectedPacket {
        /// Receiving component.
        node: NodeId,
        /// Payload kind name.
        kind: &'static str,
    },

    /// A packet addressed to a node that does not exist.
    #[error("no component registered as {0}")]
    UnknownNode(NodeId),

    /// Cache geometry cannot be realized (non power-of-two sets, zero ways, ...).
    #[error("invalid cache geometry: {0}")]
    InvalidGeometry(String),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed line in a workload trace.
    #[error("trace line {line}: {reason}")]
    Trace {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// A cross-component invariant failed during a consistency check.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The simulation still had work in flight after the cycle limit.
    #[error("simulation did not drain within {0} cycles")]
    Timeout(u64),

    /// Reading a configuration or trace file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A JSON configuration could not be parsed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Rejection returned by a state machine for an event outside its transition table.
///
/// It carries only state and event names; the cache attaches node and line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnexpectedEvent {
    /// State name at the time of the event.
    pub state: &'static str,
    /// Event name.
    pub event: &'static str,
}

impl UnexpectedEvent {
    /// Promotes the rejection to a `ProtocolViolation` at a specific cache and line.
    pub const fn at(self, node: NodeId, addr: PhysAddr) -> CoherenceError {
        CoherenceError::ProtocolViolation {
            node,
            addr,
            state: self.state,
            event: self.event,
        }
    }
}
