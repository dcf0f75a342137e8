//! Memory controller endpoints for latency modeling.
//!
//! This module provides:
//! 1. **`MemoryController`:** Latency model trait, one call per access.
//! 2. **`SimpleController`:** Fixed latency per access.
//! 3. **`MemoryNode`:** Network endpoint that answers L2 fills after the modeled latency
//!    and absorbs write-backs.

use std::collections::VecDeque;

use tracing::trace;

use crate::coherence::{MemKind, MemOp};
use crate::common::{CoherenceError, NodeId, PhysAddr, Result};
use crate::net::{NetworkPacket, Payload};

/// Trait for memory controller implementations that report access latency in cycles.
pub trait MemoryController: std::fmt::Debug {
    /// Returns the number of cycles required for an access to the given address.
    ///
    /// # Arguments
    ///
    /// * `addr` - Line address being accessed.
    ///
    /// # Returns
    ///
    /// Latency in simulation cycles.
    fn access_latency(&mut self, addr: PhysAddr) -> u64;
}

/// Fixed-latency memory controller; every access takes the same number of cycles.
#[derive(Clone, Copy, Debug)]
pub struct SimpleController {
    latency: u64,
}

impl SimpleController {
    /// Creates a simple controller with the given fixed latency in cycles.
    pub const fn new(latency: u64) -> Self {
        Self { latency }
    }
}

impl MemoryController for SimpleController {
    fn access_latency(&mut self, _addr: PhysAddr) -> u64 {
        self.latency
    }
}

/// Traffic seen by one memory node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Line fills served.
    pub loads: u64,
    /// Write-backs absorbed.
    pub stores: u64,
}

/// Memory controller attached to the network.
#[derive(Debug)]
pub struct MemoryNode {
    node_id: NodeId,
    controller: Box<dyn MemoryController>,
    pending: VecDeque<(u64, NetworkPacket)>,
    stats: MemoryStats,
}

impl MemoryNode {
    /// Creates a memory node backed by `controller`.
    pub fn new(node_id: NodeId, controller: Box<dyn MemoryController>) -> Self {
        Self {
            node_id,
            controller,
            pending: VecDeque::new(),
            stats: MemoryStats::default(),
        }
    }

    /// Network identity.
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Traffic counters.
    pub const fn stats(&self) -> MemoryStats {
        self.stats
    }

    /// Accepts a memory request arriving at cycle `now`.
    ///
    /// Credits are ignored; the memory node never sends requests of its own.
    pub fn handle_packet(&mut self, packet: NetworkPacket, now: u64) -> Result<()> {
        let msg = match packet.payload {
            Payload::Memory(msg) if msg.kind == MemKind::Request => msg,
            Payload::Credit => return Ok(()),
            _ => {
                return Err(CoherenceError::UnexpectedPacket {
                    node: self.node_id,
                    kind: packet.payload.kind(),
                });
            }
        };
        let latency = self.controller.access_latency(msg.addr);
        trace!(node = %self.node_id, addr = %msg.addr, op = ?msg.op, latency, "memory access");
        match msg.op {
            MemOp::Ld => {
                self.stats.loads += 1;
                let ready_at = now + latency;
                // Replies leave in completion order.
                let at = self.pending.partition_point(|(t, _)| *t <= ready_at);
                self.pending.insert(at, (ready_at, NetworkPacket::memory(msg.reply())));
            }
            MemOp::St => self.stats.stores += 1,
        }
        Ok(())
    }

    /// Returns the replies due by cycle `now`.
    pub fn tick(&mut self, now: u64) -> Vec<NetworkPacket> {
        let mut out = Vec::new();
        while self.pending.front().is_some_and(|(t, _)| *t <= now) {
            if let Some((_, packet)) = self.pending.pop_front() {
                out.push(packet);
            }
        }
        out
    }

    /// Whether no reply is outstanding.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}
