//! MESI client (L1 side).
//!
//! One `MesiClient` lives in each L1 slot. It owns the line's local MESI state and
//! decides which messages a processor access, an eviction or an incoming coherence
//! message produces. It never touches the tag store or the MSHR; the L1 consults
//! `hits` before calling `process` and stalls accesses to transient lines itself.
//!
//! Races are resolved in the table: a forward that reaches a line in `EI`/`MI` is served
//! first and completes the eviction locally, and a `DEMAND_I` that overtakes an upgrade
//! (`SE`) leaves the request pending in `IE`.

use super::CoherenceFsm;
use super::message::{AccessKind, CohVerb};
use crate::common::{NodeId, UnexpectedEvent};

/// Local MESI state of one L1 line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Invalid.
    #[default]
    I,
    /// Shared, read-only.
    S,
    /// Exclusive, clean.
    E,
    /// Modified.
    M,
    /// Waiting for a shared or exclusive grant after a miss.
    IE,
    /// Waiting for an exclusive grant after an upgrade from S.
    SE,
    /// Waiting for `GRANT_I` after evicting an E line.
    EI,
    /// Waiting for `GRANT_I` after evicting an M line.
    MI,
}

impl ClientState {
    /// Whether no transaction is in progress.
    pub const fn is_stable(self) -> bool {
        matches!(self, Self::I | Self::S | Self::E | Self::M)
    }

    /// Whether this client is the single owner of the line.
    pub const fn is_owner(self) -> bool {
        matches!(self, Self::E | Self::M)
    }

    /// Report name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::I => "I",
            Self::S => "S",
            Self::E => "E",
            Self::M => "M",
            Self::IE => "IE",
            Self::SE => "SE",
            Self::EI => "EI",
            Self::MI => "MI",
        }
    }
}

/// Input to the client state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// Processor load.
    Load,
    /// Processor store.
    Store,
    /// The L1 chose this line as a replacement victim.
    Evict,
    /// Coherence message from the manager or a peer.
    Message {
        /// Verb of the incoming message.
        verb: CohVerb,
        /// Peer named by a forward.
        forward_id: Option<NodeId>,
    },
}

impl ClientEvent {
    /// Event for a processor access.
    pub const fn access(kind: AccessKind) -> Self {
        match kind {
            AccessKind::Load => Self::Load,
            AccessKind::Store => Self::Store,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Load => AccessKind::Load.name(),
            Self::Store => AccessKind::Store.name(),
            Self::Evict => "evict",
            Self::Message { verb, .. } => verb.name(),
        }
    }
}

/// Message produced by a client transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientSend {
    /// To the line's home manager.
    Manager(CohVerb),
    /// To the peer named in a forward.
    Peer {
        /// Peer data verb.
        verb: CohVerb,
        /// Receiving client.
        dst: NodeId,
    },
}

/// Client state machine for one L1 line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MesiClient {
    state: ClientState,
}

impl MesiClient {
    /// Creates a client in `I`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client in an arbitrary state (tests and warm starts).
    pub const fn with_state(state: ClientState) -> Self {
        Self { state }
    }

    /// Current state.
    pub const fn state(&self) -> ClientState {
        self.state
    }

    /// Whether `kind` completes locally without a transaction.
    ///
    /// A store to an E line is a hit: it moves to M silently.
    pub const fn hits(&self, kind: AccessKind) -> bool {
        match kind {
            AccessKind::Load => matches!(self.state, ClientState::S | ClientState::E | ClientState::M),
            AccessKind::Store => self.state.is_owner(),
        }
    }

    /// Applies `event`, appending the messages it produces to `out`.
    ///
    /// # Arguments
    ///
    /// * `event` - Processor access, eviction, or incoming message.
    /// * `out` - Receives the outgoing messages in send order.
    ///
    /// # Returns
    ///
    /// `Err(UnexpectedEvent)` for combinations outside the transition table; the state is
    /// unchanged and nothing is appended in that case.
    pub fn process(&mut self, event: ClientEvent, out: &mut Vec<ClientSend>) -> Result<(), UnexpectedEvent> {
        use ClientState::{E, EI, I, IE, M, MI, S, SE};
        use CohVerb::{
            Clean, DemandI, EData, EToI, FwdE, FwdS, GrantEData, GrantI, GrantSData, IToE, IToS, MData, MToI,
            SData, UnblockE, UnblockI, UnblockIDirty, UnblockS, Writeback,
        };

        let reject = UnexpectedEvent {
            state: self.state.name(),
            event: event.name(),
        };
        let (verb, forward) = match event {
            ClientEvent::Message { verb, forward_id } => (Some(verb), forward_id),
            _ => (None, None),
        };
        let peer = |verb: CohVerb| forward.map(|dst| ClientSend::Peer { verb, dst }).ok_or(reject);

        let next = match (self.state, event, verb) {
            // Processor accesses.
            (I, ClientEvent::Load, _) => {
                out.push(ClientSend::Manager(IToS));
                IE
            }
            (I, ClientEvent::Store, _) | (S, ClientEvent::Store, _) => {
                out.push(ClientSend::Manager(IToE));
                if self.state == S { SE } else { IE }
            }
            (S | E | M, ClientEvent::Load, _) => self.state,
            (E | M, ClientEvent::Store, _) => M,

            // Replacement.
            (I, ClientEvent::Evict, _) => I,
            (S, ClientEvent::Evict, _) => I,
            (E, ClientEvent::Evict, _) => {
                out.push(ClientSend::Manager(EToI));
                EI
            }
            (M, ClientEvent::Evict, _) => {
                out.push(ClientSend::Manager(MToI));
                MI
            }

            // Recalls.
            (I | S | E | EI, _, Some(DemandI)) => {
                out.push(ClientSend::Manager(UnblockI));
                I
            }
            (M | MI, _, Some(DemandI)) => {
                out.push(ClientSend::Manager(UnblockIDirty));
                I
            }
            (IE | SE, _, Some(DemandI)) => {
                out.push(ClientSend::Manager(UnblockI));
                IE
            }

            // Forwards from the manager on behalf of another client.
            (E, _, Some(FwdE)) => {
                out.push(peer(EData)?);
                I
            }
            (E, _, Some(FwdS)) => {
                out.push(peer(SData)?);
                out.push(ClientSend::Manager(Clean));
                S
            }
            (M, _, Some(FwdE)) | (MI, _, Some(FwdE)) => {
                out.push(peer(MData)?);
                I
            }
            (M, _, Some(FwdS)) => {
                out.push(peer(SData)?);
                out.push(ClientSend::Manager(Writeback));
                S
            }
            (EI, _, Some(FwdE | FwdS)) => {
                out.push(peer(EData)?);
                I
            }
            (MI, _, Some(FwdS)) => {
                out.push(peer(SData)?);
                out.push(ClientSend::Manager(Writeback));
                I
            }

            // Grants and peer data.
            (IE | SE, _, Some(GrantEData | EData)) => {
                out.push(ClientSend::Manager(UnblockE));
                E
            }
            (IE | SE, _, Some(MData)) => {
                out.push(ClientSend::Manager(UnblockE));
                M
            }
            (IE, _, Some(GrantSData | SData)) => {
                out.push(ClientSend::Manager(UnblockS));
                S
            }
            (EI | MI, _, Some(GrantI)) => {
                out.push(ClientSend::Manager(UnblockI));
                I
            }

            _ => return Err(reject),
        };
        self.state = next;
        Ok(())
    }
}

impl CoherenceFsm for MesiClient {
    fn is_stable(&self) -> bool {
        self.state.is_stable()
    }

    fn reset(&mut self) {
        self.state = ClientState::I;
    }
}
