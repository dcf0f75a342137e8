//! MESI manager (L2 side).
//!
//! One `MesiManager` lives in each L2 slot and tracks which clients hold the line:
//! a single owner in E, or a sharer set in S, never both. It turns client requests and
//! replies, plus L2-initiated evictions, into outgoing messages and cache-level actions
//! (`MarkDirty`, `Invalidate`). Data availability is the L2's concern: a request reaches
//! a manager in `I` only after the line has been fetched from memory.
//!
//! Replies that the current state does not expect are stale acknowledgements from a
//! transaction that a race already closed, and are ignored.

use super::CoherenceFsm;
use super::message::CohVerb;
use super::sharers::SharersList;
use crate::common::{NodeId, UnexpectedEvent};

/// Directory state of one L2 line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ManagerState {
    /// No client holds the line.
    #[default]
    I,
    /// One or more clients hold read-only copies.
    S,
    /// A single client owns the line.
    E,
    /// Exclusive grant sent, waiting for `UNBLOCK_E`.
    IE,
    /// Owner asked to share, waiting for the requester's unblock and the owner's downgrade.
    ES,
    /// Owner asked to hand over, waiting for the new owner's `UNBLOCK_E`.
    EE,
    /// Shared grant sent, waiting for `UNBLOCK_S`.
    SS,
    /// Sharers recalled for an upgrade, waiting for every `UNBLOCK_I`.
    SIE,
    /// Owner recalled for an L2 eviction.
    EiEvict,
    /// Sharers recalled for an L2 eviction.
    SiEvict,
    /// Owner's own eviction acknowledged, waiting for `UNBLOCK_I`.
    EiPut,
}

impl ManagerState {
    /// Whether no transaction is in progress.
    pub const fn is_stable(self) -> bool {
        matches!(self, Self::I | Self::S | Self::E)
    }

    /// Report name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::I => "I",
            Self::S => "S",
            Self::E => "E",
            Self::IE => "IE",
            Self::ES => "ES",
            Self::EE => "EE",
            Self::SS => "SS",
            Self::SIE => "SIE",
            Self::EiEvict => "EI_EVICT",
            Self::SiEvict => "SI_EVICT",
            Self::EiPut => "EI_PUT",
        }
    }
}

/// Input to the manager state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerEvent {
    /// Message from a client.
    Message {
        /// Verb of the incoming message.
        verb: CohVerb,
        /// Sending client.
        src: NodeId,
    },
    /// The L2 chose this line as a replacement victim.
    Evict,
}

impl ManagerEvent {
    const fn name(self) -> &'static str {
        match self {
            Self::Message { verb, .. } => verb.name(),
            Self::Evict => "evict",
        }
    }
}

/// Effect of a manager transition on the outside world.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerAction {
    /// Send a message to a client.
    Send {
        /// Verb.
        verb: CohVerb,
        /// Receiving client.
        dst: NodeId,
        /// Peer the receiver must supply (forwards only).
        forward_id: Option<NodeId>,
    },
    /// A client returned dirty data; the L2 copy now differs from memory.
    MarkDirty,
    /// No client holds the line any more; free the slot (writing back if dirty).
    Invalidate,
}

/// Whether an event advanced the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The event was consumed by the transition table.
    Accepted,
    /// Stale event; nothing changed.
    Ignored,
}

/// Manager state machine for one L2 line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MesiManager {
    state: ManagerState,
    owner: Option<NodeId>,
    sharers: SharersList,
    acks_needed: usize,
    acks_received: usize,
    es_unblocked: bool,
    es_downgraded: bool,
}

impl MesiManager {
    /// Creates a manager in `I` with no holders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub const fn state(&self) -> ManagerState {
        self.state
    }

    /// Owning client, if the line is held exclusively (or being handed to one).
    pub const fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// Clients recorded as sharers.
    pub const fn sharers(&self) -> &SharersList {
        &self.sharers
    }

    /// Invalidation acknowledgements still outstanding in `SIE` / `SI_EVICT`.
    pub const fn pending_acks(&self) -> usize {
        self.acks_needed.saturating_sub(self.acks_received)
    }

    /// Checks the owner/sharers exclusion.
    pub fn holders_consistent(&self) -> bool {
        self.owner.is_none() || self.sharers.is_empty()
    }

    fn send(out: &mut Vec<ManagerAction>, verb: CohVerb, dst: NodeId) {
        out.push(ManagerAction::Send {
            verb,
            dst,
            forward_id: None,
        });
    }

    fn expect_acks(&mut self, count: usize) {
        self.acks_needed = count;
        self.acks_received = 0;
    }

    /// Applies `event`, appending the resulting actions to `out`.
    ///
    /// # Arguments
    ///
    /// * `event` - Client message or L2 eviction.
    /// * `out` - Receives actions in the order they must be performed.
    ///
    /// # Returns
    ///
    /// `Ignored` for stale messages (state untouched), `Accepted` otherwise, and
    /// `Err(UnexpectedEvent)` for manager-bound verbs this table never accepts.
    pub fn process(
        &mut self,
        event: ManagerEvent,
        out: &mut Vec<ManagerAction>,
    ) -> Result<Disposition, UnexpectedEvent> {
        use CohVerb::{
            Clean, DemandI, EToI, FwdE, FwdS, GrantEData, GrantI, GrantSData, IToE, IToS, MToI, UnblockE,
            UnblockI, UnblockIDirty, UnblockS, Writeback,
        };
        use ManagerState::{E, EE, ES, EiEvict, EiPut, I, IE, S, SIE, SS, SiEvict};

        let reject = UnexpectedEvent {
            state: self.state.name(),
            event: event.name(),
        };

        let (verb, src) = match event {
            ManagerEvent::Evict => {
                return self.start_eviction(out).ok_or(reject).map(|()| Disposition::Accepted);
            }
            ManagerEvent::Message { verb, src } => (verb, src),
        };
        if !verb.to_manager() {
            return Err(reject);
        }

        match (self.state, verb) {
            // Requests.
            (I, IToS | IToE) => {
                self.owner = Some(src);
                Self::send(out, GrantEData, src);
                self.state = IE;
            }
            (E, IToS | IToE) if self.owner == Some(src) => {
                Self::send(out, GrantEData, src);
                self.state = IE;
            }
            (E, IToE) => {
                let Some(owner) = self.owner else { return Err(reject) };
                out.push(ManagerAction::Send {
                    verb: FwdE,
                    dst: owner,
                    forward_id: Some(src),
                });
                self.owner = Some(src);
                self.state = EE;
            }
            (E, IToS) => {
                let Some(owner) = self.owner.take() else { return Err(reject) };
                out.push(ManagerAction::Send {
                    verb: FwdS,
                    dst: owner,
                    forward_id: Some(src),
                });
                let _ = self.sharers.add(owner);
                let _ = self.sharers.add(src);
                self.es_unblocked = false;
                self.es_downgraded = false;
                self.state = ES;
            }
            (E, EToI | MToI) if self.owner == Some(src) => {
                if verb == MToI {
                    out.push(ManagerAction::MarkDirty);
                }
                self.owner = None;
                Self::send(out, GrantI, src);
                self.state = EiPut;
            }
            (S, IToS) => {
                let _ = self.sharers.add(src);
                Self::send(out, GrantSData, src);
                self.state = SS;
            }
            (S, IToE) => {
                let victims: Vec<NodeId> = self.sharers.take().into_iter().filter(|&n| n != src).collect();
                self.owner = Some(src);
                for &dst in &victims {
                    Self::send(out, DemandI, dst);
                }
                if victims.is_empty() {
                    Self::send(out, GrantEData, src);
                    self.state = IE;
                } else {
                    self.expect_acks(victims.len());
                    self.state = SIE;
                }
            }
            (I | S | E, EToI | MToI) => return Ok(Disposition::Ignored),

            // Replies.
            (IE | EE, UnblockE) => self.state = E,
            (SS, UnblockS) => self.state = S,
            (ES, UnblockS) => {
                self.es_unblocked = true;
                self.finish_share();
            }
            (ES, Clean | Writeback) => {
                if verb == Writeback {
                    out.push(ManagerAction::MarkDirty);
                }
                self.es_downgraded = true;
                self.finish_share();
            }
            (ES, UnblockE) => {
                // The owner was evicting and handed over exclusive ownership instead of sharing.
                self.sharers.clear();
                self.owner = Some(src);
                self.state = E;
            }
            (SIE, UnblockI | UnblockIDirty) => {
                if verb == UnblockIDirty {
                    out.push(ManagerAction::MarkDirty);
                }
                self.acks_received += 1;
                if self.pending_acks() == 0 {
                    let Some(owner) = self.owner else { return Err(reject) };
                    Self::send(out, GrantEData, owner);
                    self.state = IE;
                }
            }
            (SiEvict, UnblockI | UnblockIDirty) => {
                if verb == UnblockIDirty {
                    out.push(ManagerAction::MarkDirty);
                }
                self.acks_received += 1;
                if self.pending_acks() == 0 {
                    self.state = I;
                    out.push(ManagerAction::Invalidate);
                }
            }
            (EiEvict | EiPut, UnblockI | UnblockIDirty) => {
                if verb == UnblockIDirty {
                    out.push(ManagerAction::MarkDirty);
                }
                self.state = I;
                out.push(ManagerAction::Invalidate);
            }

            // A request while a transaction is open never reaches the FSM (the MSHR holds it),
            // so what is left is a stale reply.
            (_, IToS | IToE | EToI | MToI) => return Err(reject),
            _ => return Ok(Disposition::Ignored),
        }
        debug_assert!(self.holders_consistent());
        Ok(Disposition::Accepted)
    }

    fn finish_share(&mut self) {
        if self.es_unblocked && self.es_downgraded {
            self.state = ManagerState::S;
        }
    }

    fn start_eviction(&mut self, out: &mut Vec<ManagerAction>) -> Option<()> {
        match self.state {
            ManagerState::E => {
                let owner = self.owner.take()?;
                Self::send(out, CohVerb::DemandI, owner);
                self.state = ManagerState::EiEvict;
            }
            ManagerState::S => {
                let sharers = self.sharers.take();
                for &dst in &sharers {
                    Self::send(out, CohVerb::DemandI, dst);
                }
                if sharers.is_empty() {
                    self.state = ManagerState::I;
                    out.push(ManagerAction::Invalidate);
                } else {
                    self.expect_acks(sharers.len());
                    self.state = ManagerState::SiEvict;
                }
            }
            ManagerState::I => {
                out.push(ManagerAction::Invalidate);
            }
            _ => return None,
        }
        Some(())
    }
}

impl CoherenceFsm for MesiManager {
    fn is_stable(&self) -> bool {
        self.state.is_stable()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
