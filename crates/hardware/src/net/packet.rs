//! Network packet envelope.
//!
//! A node may host more than one unit (a tile holds an L1 and an L2 bank), so every
//! packet names the port it is delivered to as well as the node.

use crate::coherence::message::{CohMsg, MemKind, MemMsg};
use crate::common::NodeId;

/// Unit within a node that sends or receives a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortId {
    /// Private L1 (client side).
    L1,
    /// L2 bank (manager side).
    L2,
    /// Memory controller.
    Memory,
}

/// What a packet carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Coherence message between an L1 and an L2, or between two L1s.
    Coherence(CohMsg),
    /// Memory request or reply between an L2 and a controller.
    Memory(MemMsg),
    /// One unit of credit returned to the sender of a consumed packet.
    Credit,
}

impl Payload {
    /// Kind name for logs and errors.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Coherence(_) => "coherence",
            Self::Memory(_) => "memory",
            Self::Credit => "credit",
        }
    }
}

/// A routed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkPacket {
    /// Sending node.
    pub src: NodeId,
    /// Receiving node.
    pub dst: NodeId,
    /// Receiving unit at `dst`.
    pub dst_port: PortId,
    /// Contents.
    pub payload: Payload,
}

impl NetworkPacket {
    /// Wraps a coherence message, routed by its own endpoints.
    ///
    /// Client-to-manager verbs go to the L2 port; grants, forwards, demands and peer
    /// data go to the L1 port.
    pub const fn coherence(msg: CohMsg) -> Self {
        Self {
            src: msg.src,
            dst: msg.dst,
            dst_port: if msg.verb.to_manager() { PortId::L2 } else { PortId::L1 },
            payload: Payload::Coherence(msg),
        }
    }

    /// Wraps a memory message, routed by its own endpoints.
    pub const fn memory(msg: MemMsg) -> Self {
        Self {
            src: msg.src,
            dst: msg.dst,
            dst_port: match msg.kind {
                MemKind::Request => PortId::Memory,
                MemKind::Reply => PortId::L2,
            },
            payload: Payload::Memory(msg),
        }
    }

    /// A credit returned from `src` to the unit `dst_port` of `dst`.
    pub const fn credit(src: NodeId, dst: NodeId, dst_port: PortId) -> Self {
        Self {
            src,
            dst,
            dst_port,
            payload: Payload::Credit,
        }
    }

    /// Unit that sent the packet; `None` for credits.
    pub const fn src_port(&self) -> Option<PortId> {
        match &self.payload {
            Payload::Coherence(msg) => {
                if msg.verb.to_manager() || msg.verb.is_peer_data() {
                    Some(PortId::L1)
                } else {
                    Some(PortId::L2)
                }
            }
            Payload::Memory(msg) => match msg.kind {
                MemKind::Request => Some(PortId::L2),
                MemKind::Reply => Some(PortId::Memory),
            },
            Payload::Credit => None,
        }
    }

    /// Whether both endpoints are units of the same node.
    pub const fn is_local(&self) -> bool {
        self.src.0 == self.dst.0
    }

    /// Coherence message carried, if any.
    pub const fn as_coherence(&self) -> Option<&CohMsg> {
        match &self.payload {
            Payload::Coherence(msg) => Some(msg),
            _ => None,
        }
    }

    /// Memory message carried, if any.
    pub const fn as_memory(&self) -> Option<&MemMsg> {
        match &self.payload {
            Payload::Memory(msg) => Some(msg),
            _ => None,
        }
    }
}
