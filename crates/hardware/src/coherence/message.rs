//! Protocol messages.
//!
//! This module defines every message the engine exchanges. It provides:
//! 1. **Coherence verbs:** Client requests and replies, manager requests and replies,
//!    and peer data supplied on a forward.
//! 2. **Memory messages:** Line loads and stores between an L2 and a memory controller.
//! 3. **Processor interface:** Load/store requests into an L1 and their responses.

use crate::common::{NodeId, PhysAddr};

/// Load or store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Read access.
    #[default]
    Load,
    /// Write access.
    Store,
}

impl AccessKind {
    /// Lower-case name used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Store => "store",
        }
    }
}

/// Whether a message may stall at its receiver.
///
/// Requests go through the MSHR and may be parked; replies always make progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsgClass {
    /// Opens or forwards a transaction.
    Request,
    /// Completes a step of an open transaction.
    Reply,
}

/// Coherence message verb.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CohVerb {
    /// Client asks for a readable copy.
    IToS,
    /// Client asks for an exclusive copy (store miss or upgrade).
    IToE,
    /// Client evicts a clean exclusive line.
    EToI,
    /// Client evicts a modified line; carries the data.
    MToI,
    /// Client acknowledges a shared grant.
    UnblockS,
    /// Client acknowledges an exclusive grant.
    UnblockE,
    /// Client acknowledges an invalidation or eviction.
    UnblockI,
    /// Client acknowledges an invalidation and returns dirty data.
    UnblockIDirty,
    /// Former owner confirms a clean downgrade to shared.
    Clean,
    /// Former owner downgrades to shared and returns dirty data.
    Writeback,
    /// Manager asks the owner to share with `forward_id`.
    FwdS,
    /// Manager asks the owner to hand the line to `forward_id`.
    FwdE,
    /// Manager grants a shared copy with data.
    GrantSData,
    /// Manager grants an exclusive copy with data.
    GrantEData,
    /// Manager acknowledges a client eviction.
    GrantI,
    /// Manager recalls the line.
    DemandI,
    /// Peer supplies shared data on a forward.
    SData,
    /// Peer supplies clean exclusive data on a forward.
    EData,
    /// Peer supplies modified data on a forward.
    MData,
}

impl CohVerb {
    /// Number of verbs.
    pub const COUNT: usize = 19;

    /// Every verb, in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::IToS,
        Self::IToE,
        Self::EToI,
        Self::MToI,
        Self::UnblockS,
        Self::UnblockE,
        Self::UnblockI,
        Self::UnblockIDirty,
        Self::Clean,
        Self::Writeback,
        Self::FwdS,
        Self::FwdE,
        Self::GrantSData,
        Self::GrantEData,
        Self::GrantI,
        Self::DemandI,
        Self::SData,
        Self::EData,
        Self::MData,
    ];

    /// Dense index for per-verb counters.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Protocol name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::IToS => "I_to_S",
            Self::IToE => "I_to_E",
            Self::EToI => "E_to_I",
            Self::MToI => "M_to_I",
            Self::UnblockS => "UNBLOCK_S",
            Self::UnblockE => "UNBLOCK_E",
            Self::UnblockI => "UNBLOCK_I",
            Self::UnblockIDirty => "UNBLOCK_I_DIRTY",
            Self::Clean => "CLEAN",
            Self::Writeback => "WRITEBACK",
            Self::FwdS => "FWD_S",
            Self::FwdE => "FWD_E",
            Self::GrantSData => "GRANT_S_DATA",
            Self::GrantEData => "GRANT_E_DATA",
            Self::GrantI => "GRANT_I",
            Self::DemandI => "DEMAND_I",
            Self::SData => "S_DATA",
            Self::EData => "E_DATA",
            Self::MData => "M_DATA",
        }
    }

    /// Request or reply.
    pub const fn class(self) -> MsgClass {
        match self {
            Self::IToS | Self::IToE | Self::EToI | Self::MToI | Self::FwdS | Self::FwdE | Self::DemandI => {
                MsgClass::Request
            }
            _ => MsgClass::Reply,
        }
    }

    /// Whether the verb travels from a client to a manager.
    pub const fn to_manager(self) -> bool {
        matches!(
            self,
            Self::IToS
                | Self::IToE
                | Self::EToI
                | Self::MToI
                | Self::UnblockS
                | Self::UnblockE
                | Self::UnblockI
                | Self::UnblockIDirty
                | Self::Clean
                | Self::Writeback
        )
    }

    /// Whether the verb carries data from one client to another.
    pub const fn is_peer_data(self) -> bool {
        matches!(self, Self::SData | Self::EData | Self::MData)
    }

    /// Whether the verb is a client eviction notice.
    pub const fn is_eviction(self) -> bool {
        matches!(self, Self::EToI | Self::MToI)
    }
}

/// Coherence message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CohMsg {
    /// Verb.
    pub verb: CohVerb,
    /// Line-aligned address.
    pub addr: PhysAddr,
    /// Sender.
    pub src: NodeId,
    /// Receiver.
    pub dst: NodeId,
    /// Peer to supply on `FWD_S` / `FWD_E`.
    pub forward_id: Option<NodeId>,
    /// Access that caused the message (informational).
    pub rw: AccessKind,
}

impl CohMsg {
    /// Builds a message with no forward target.
    pub const fn new(verb: CohVerb, addr: PhysAddr, src: NodeId, dst: NodeId) -> Self {
        Self {
            verb,
            addr,
            src,
            dst,
            forward_id: None,
            rw: AccessKind::Load,
        }
    }

    /// Sets the forward target.
    #[must_use]
    pub const fn with_forward(mut self, forward_id: NodeId) -> Self {
        self.forward_id = Some(forward_id);
        self
    }

    /// Sets the access kind.
    #[must_use]
    pub const fn with_rw(mut self, rw: AccessKind) -> Self {
        self.rw = rw;
        self
    }
}

/// Memory operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemOp {
    /// Line fill.
    Ld,
    /// Line write-back.
    St,
}

/// Direction of a memory message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemKind {
    /// L2 to controller.
    Request,
    /// Controller to L2.
    Reply,
}

/// Memory message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemMsg {
    /// Line-aligned address.
    pub addr: PhysAddr,
    /// Operation.
    pub op: MemOp,
    /// Direction.
    pub kind: MemKind,
    /// Sender.
    pub src: NodeId,
    /// Receiver.
    pub dst: NodeId,
}

impl MemMsg {
    /// Builds a request from an L2 to a controller.
    pub const fn request(op: MemOp, addr: PhysAddr, src: NodeId, dst: NodeId) -> Self {
        Self {
            addr,
            op,
            kind: MemKind::Request,
            src,
            dst,
        }
    }

    /// Builds the reply to this request.
    pub const fn reply(&self) -> Self {
        Self {
            addr: self.addr,
            op: self.op,
            kind: MemKind::Reply,
            src: self.dst,
            dst: self.src,
        }
    }
}

/// Processor load or store presented to an L1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcRequest {
    /// Correlation id, unique per processor.
    pub id: u64,
    /// Byte address.
    pub addr: PhysAddr,
    /// Load or store.
    pub kind: AccessKind,
}

/// Completion of a `ProcRequest`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcResponse {
    /// Id of the completed request.
    pub id: u64,
    /// Byte address of the completed request.
    pub addr: PhysAddr,
    /// Load or store.
    pub kind: AccessKind,
    /// Cycle the response becomes visible to the processor.
    pub ready_at: u64,
}
