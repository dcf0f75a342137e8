//! Shared L2 cache (manager side).
//!
//! The L2 is the home of every line mapped to it. Each resident line carries a
//! `MesiManager` that records the owner or sharers; the cache around it handles:
//! 1. **Requests:** `I_to_S`, `I_to_E`, `E_to_I`, `M_to_I` open an MSHR entry for the
//!    line. A miss fetches the line from memory before the manager sees the request.
//! 2. **Replies:** Unblocks, `CLEAN` and `WRITEBACK` advance the manager; the entry closes
//!    once the manager is stable again.
//! 3. **Replacement:** The victim is recalled from its holders, written back if dirty,
//!    and the new line fetched into the freed slot.
//!
//! Requests that meet a busy line are parked in the stall buffer and replayed in
//! arrival order when the line settles or an MSHR entry frees up.

use tracing::{debug, error, trace, warn};

use super::CacheCore;
use super::stall::{StallReason, WaitKey};
use super::tag_store::{Reservation, SlotId};
use crate::coherence::{
    CohMsg, CoherenceFsm, Disposition, ManagerAction, ManagerEvent, ManagerState, MemKind, MemMsg, MemOp,
    MesiManager, MsgClass,
};
use crate::common::{CoherenceError, NodeId, PhysAddr, Result, UnexpectedEvent};
use crate::config::{CacheConfig, CacheSettings};
use crate::net::{DestMap, NetworkPacket, Payload};
use crate::sim::clock::SimClock;

/// Progress of an L2 transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L2Phase {
    /// Waiting for the slot's previous line to be recalled.
    Evicting,
    /// Waiting for the line from memory.
    Fetching,
    /// The manager is running the request.
    Active,
}

/// MSHR payload: the request that opened the transaction and how far it got.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct L2Pending {
    /// Original client request.
    pub request: CohMsg,
    /// Current phase.
    pub phase: L2Phase,
}

/// Core specialization used by the L2.
pub type L2Core = CacheCore<MesiManager, L2Pending, CohMsg>;

/// Shared manager cache.
#[derive(Debug)]
pub struct L2Cache {
    core: L2Core,
    mc_map: Box<dyn DestMap>,
}

impl L2Cache {
    /// Creates an empty L2.
    ///
    /// # Arguments
    ///
    /// * `node_id` - Network identity.
    /// * `config` - Geometry and latencies.
    /// * `settings` - MSHR size and downstream credits.
    /// * `mc_map` - Memory controller for each line.
    /// * `clock` - Shared simulation clock.
    pub fn new(
        node_id: NodeId,
        config: &CacheConfig,
        settings: &CacheSettings,
        mc_map: Box<dyn DestMap>,
        clock: SimClock,
    ) -> Result<Self> {
        Ok(Self {
            core: CacheCore::new(node_id, config, settings, clock)?,
            mc_map,
        })
    }

    /// Shared cache state (tag store, MSHR, stall buffer, port, stats).
    pub const fn core(&self) -> &L2Core {
        &self.core
    }

    /// Manager of the line containing `addr`, if resident.
    pub fn manager(&self, addr: PhysAddr) -> Option<&MesiManager> {
        self.core.fsm_for(addr)
    }

    /// Manager state of the line containing `addr`; `I` when not resident.
    pub fn manager_state(&self, addr: PhysAddr) -> ManagerState {
        self.manager(addr).map_or(ManagerState::I, MesiManager::state)
    }

    /// Accepts a packet from the network: client requests and replies, memory fills, credits.
    pub fn handle_incoming(&mut self, packet: NetworkPacket) -> Result<()> {
        match packet.payload {
            Payload::Credit => {
                self.core.port.add_credit();
                return Ok(());
            }
            Payload::Coherence(msg) => {
                if !msg.verb.to_manager() {
                    let err = UnexpectedEvent {
                        state: "L2",
                        event: msg.verb.name(),
                    }
                    .at(self.core.node_id, msg.addr);
                    error!(%err, "client-bound message delivered to an L2");
                    return Err(err);
                }
                trace!(
                    node = %self.core.node_id,
                    addr = %msg.addr,
                    verb = msg.verb.name(),
                    src = %msg.src,
                    "message received"
                );
                match msg.verb.class() {
                    MsgClass::Request => {
                        self.core.stats.requests += 1;
                        self.dispatch(msg)?;
                    }
                    MsgClass::Reply => self.handle_reply(msg)?,
                }
            }
            Payload::Memory(msg) if msg.kind == MemKind::Reply && msg.op == MemOp::Ld => {
                self.handle_fill(msg.addr)?;
            }
            Payload::Memory(_) => {
                return Err(CoherenceError::UnexpectedPacket {
                    node: self.core.node_id,
                    kind: packet.payload.kind(),
                });
            }
        }
        self.drain_wakes()
    }

    /// Advances one cycle and returns the packets leaving the cache.
    pub fn tick(&mut self) -> Vec<NetworkPacket> {
        self.core.tick()
    }

    fn dispatch(&mut self, request: CohMsg) -> Result<()> {
        let line = self.core.tags.line_addr(request.addr);
        if let Some(key) = self.core.stalls.has_match(line) {
            self.core.stall(request, line, StallReason::PrevPend, key);
            return Ok(());
        }
        if self.core.mshr.has_match(line) {
            self.core.stall(request, line, StallReason::PrevPend, WaitKey::Line(line));
            return Ok(());
        }

        if let Some(slot) = self.core.tags.lookup(line) {
            if self.core.slot_busy(slot) {
                self.core.stall(request, line, StallReason::Trans, WaitKey::Line(line));
                return Ok(());
            }
            if !self.core.mshr.can_allocate() {
                self.core.stall(request, line, StallReason::Mshr, WaitKey::AnyMshr);
                return Ok(());
            }
            self.open(line, slot, request, L2Phase::Active);
            self.core.tags.touch(slot);
            let event = ManagerEvent::Message {
                verb: request.verb,
                src: request.src,
            };
            if self.run_manager(slot, line, event)? == Disposition::Ignored {
                self.drop_stale(&request);
                let _ = self.core.release_mshr(line);
            }
            return Ok(());
        }

        if request.verb.is_eviction() {
            self.drop_stale(&request);
            return Ok(());
        }
        if !self.core.mshr.can_allocate() {
            self.core.stall(request, line, StallReason::Mshr, WaitKey::AnyMshr);
            return Ok(());
        }
        self.core.stats.misses += 1;
        match self.core.tags.reserve_block_for(line) {
            Reservation::Vacant(slot) => {
                self.open(line, slot, request, L2Phase::Fetching);
                self.core.tags.install(slot, line);
                self.fetch(line);
                Ok(())
            }
            Reservation::Occupied { slot, victim } => {
                if self.core.slot_busy(slot) {
                    self.core.stall(request, line, StallReason::LruBusy, WaitKey::Line(victim));
                    return Ok(());
                }
                self.open(line, slot, request, L2Phase::Evicting);
                self.core.evicting_for[slot] = Some(line);
                self.core.stats.evictions += 1;
                debug!(node = %self.core.node_id, victim = %victim, line = %line, "evicting victim");
                let _ = self.run_manager(slot, victim, ManagerEvent::Evict)?;
                Ok(())
            }
        }
    }

    fn open(&mut self, line: PhysAddr, slot: SlotId, request: CohMsg, phase: L2Phase) {
        let opened = self.core.mshr.allocate(line, slot, L2Pending { request, phase });
        debug_assert!(opened.is_ok(), "MSHR availability is checked before opening");
    }

    fn handle_reply(&mut self, reply: CohMsg) -> Result<()> {
        let line = self.core.tags.line_addr(reply.addr);
        let Some(slot) = self.core.tags.lookup(line) else {
            self.drop_stale(&reply);
            return Ok(());
        };
        let event = ManagerEvent::Message {
            verb: reply.verb,
            src: reply.src,
        };
        if self.run_manager(slot, line, event)? == Disposition::Ignored {
            self.drop_stale(&reply);
            return Ok(());
        }
        let closes = self.core.fsms[slot].is_stable()
            && self
                .core
                .mshr
                .get(line)
                .is_some_and(|entry| entry.slot == slot && entry.pending.phase == L2Phase::Active);
        if closes {
            let _ = self.core.release_mshr(line);
        }
        Ok(())
    }

    /// Memory returned `line`; hand the waiting request to the manager.
    fn handle_fill(&mut self, line: PhysAddr) -> Result<()> {
        let Some(entry) = self.core.mshr.get_mut(line) else {
            warn!(node = %self.core.node_id, line = %line, "fill with no open transaction");
            return Ok(());
        };
        if entry.pending.phase != L2Phase::Fetching {
            warn!(node = %self.core.node_id, line = %line, "fill for a transaction not fetching");
            return Ok(());
        }
        entry.pending.phase = L2Phase::Active;
        let (slot, request) = (entry.slot, entry.pending.request);
        self.core.tags.set_have_data(slot);
        self.core.tags.touch(slot);
        let event = ManagerEvent::Message {
            verb: request.verb,
            src: request.src,
        };
        let _ = self.run_manager(slot, line, event)?;
        Ok(())
    }

    /// Runs the manager of `slot` and performs the actions it emits.
    fn run_manager(&mut self, slot: SlotId, line: PhysAddr, event: ManagerEvent) -> Result<Disposition> {
        let node = self.core.node_id;
        let mut actions = Vec::new();
        let disposition = match self.core.fsms[slot].process(event, &mut actions) {
            Ok(disposition) => disposition,
            Err(rejected) => {
                let err = rejected.at(node, line);
                error!(%err, "manager rejected event");
                return Err(err);
            }
        };
        for action in actions {
            match action {
                ManagerAction::Send { verb, dst, forward_id } => {
                    let msg = CohMsg::new(verb, line, node, dst);
                    let msg = forward_id.map_or(msg, |peer| msg.with_forward(peer));
                    trace!(node = %node, addr = %line, verb = verb.name(), dst = %dst, "message sent");
                    self.core.send(NetworkPacket::coherence(msg));
                }
                ManagerAction::MarkDirty => self.core.tags.mark_dirty(slot),
                ManagerAction::Invalidate => self.invalidate(slot, line),
            }
        }
        Ok(disposition)
    }

    /// Frees `slot` once no client holds `line`, and moves on to whatever waited for it.
    fn invalidate(&mut self, slot: SlotId, line: PhysAddr) {
        if self.core.tags.invalidate(slot) {
            self.write_back(line);
        }
        self.core.fsms[slot].reset();
        debug!(node = %self.core.node_id, addr = %line, "line invalidated");

        match self.core.evicting_for[slot].take() {
            Some(next) => {
                self.core.settle(line);
                if let Some(entry) = self.core.mshr.get_mut(next) {
                    entry.pending.phase = L2Phase::Fetching;
                }
                self.core.tags.install(slot, next);
                self.fetch(next);
            }
            None => {
                let _ = self.core.release_mshr(line);
            }
        }
    }

    fn fetch(&mut self, line: PhysAddr) {
        let mc = self.mc_map.lookup(line);
        self.core.stats.mem_loads += 1;
        let msg = MemMsg::request(MemOp::Ld, line, self.core.node_id, mc);
        self.core.send(NetworkPacket::memory(msg));
    }

    fn write_back(&mut self, line: PhysAddr) {
        let mc = self.mc_map.lookup(line);
        self.core.stats.mem_stores += 1;
        let msg = MemMsg::request(MemOp::St, line, self.core.node_id, mc);
        self.core.send(NetworkPacket::memory(msg));
    }

    fn drop_stale(&mut self, msg: &CohMsg) {
        self.core.stats.stale_drops += 1;
        debug!(
            node = %self.core.node_id,
            addr = %msg.addr,
            verb = msg.verb.name(),
            src = %msg.src,
            "stale message dropped"
        );
    }

    fn drain_wakes(&mut self) -> Result<()> {
        while let Some(woken) = self.core.next_wake() {
            for (seq, entry) in woken {
                trace!(node = %self.core.node_id, addr = %entry.addr, reason = entry.reason.name(), "replaying");
                self.core.replaying = Some((seq, entry.stalled_at));
                let replayed = self.dispatch(entry.request);
                self.core.replaying = None;
                replayed?;
            }
        }
        Ok(())
    }
}
