//! MESI coherence protocol.
//!
//! This module holds the protocol itself, independent of any cache structure. It provides:
//! 1. **Messages:** Coherence verbs, memory messages and the processor interface.
//! 2. **Client:** The per-line L1 state machine.
//! 3. **Manager:** The per-line L2 state machine and its sharer set.
//!
//! Both state machines are plain values stored in an arena parallel to a tag store and
//! driven synchronously; neither knows its own address or node.

/// Per-line L1 state machine.
pub mod client;

/// Per-line L2 state machine.
pub mod manager;

/// Coherence, memory and processor messages.
pub mod message;

/// Sharer set kept by the manager.
pub mod sharers;

pub use client::{ClientEvent, ClientSend, ClientState, MesiClient};
pub use manager::{Disposition, ManagerAction, ManagerEvent, ManagerState, MesiManager};
pub use message::{AccessKind, CohMsg, CohVerb, MemKind, MemMsg, MemOp, MsgClass, ProcRequest, ProcResponse};
pub use sharers::SharersList;

/// Capabilities the generic cache core needs from a per-line state machine.
pub trait CoherenceFsm: Default + std::fmt::Debug {
    /// Whether no transaction is in progress on the line.
    fn is_stable(&self) -> bool;

    /// Returns to the initial invalid state when the slot is freed.
    fn reset(&mut self);
}
