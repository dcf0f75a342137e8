//! Private L1 cache (client side).
//!
//! The L1 accepts processor loads and stores, answers hits after the hit latency and
//! turns misses, upgrades and evictions into coherence transactions with the line's home
//! L2. Every line has a `MesiClient` in the slot arena; the L1 owns the MSHR and stall
//! buffer around it:
//! 1. **Hit:** Stable line whose state permits the access; no messages.
//! 2. **Miss / upgrade:** MSHR entry opened, request sent, response deferred until the
//!    closing grant or peer data arrives.
//! 3. **Replacement:** The victim is evicted first (silently from S); the new line is
//!    installed and issued once the victim's slot is free.
//!
//! Accesses that cannot proceed are parked with `MSHR_STALL`, `PREV_PEND_STALL`,
//! `LRU_BUSY_STALL` or `TRANS_STALL` and replayed when the blocking condition clears.

use tracing::{debug, error, trace, warn};

use super::CacheCore;
use super::stall::{StallReason, WaitKey};
use super::tag_store::{Reservation, SlotId};
use crate::coherence::{
    AccessKind, ClientEvent, ClientSend, ClientState, CohMsg, CohVerb, MesiClient, ProcRequest, ProcResponse,
};
use crate::common::{CoherenceError, NodeId, PhysAddr, Result, UnexpectedEvent};
use crate::config::{CacheConfig, CacheSettings};
use crate::net::{DestMap, NetworkPacket, Payload};
use crate::sim::clock::SimClock;

/// Core specialization used by the L1.
pub type L1Core = CacheCore<MesiClient, ProcRequest, ProcRequest>;

/// Private client cache.
#[derive(Debug)]
pub struct L1Cache {
    core: L1Core,
    l2_map: Box<dyn DestMap>,
    responses: Vec<ProcResponse>,
}

impl L1Cache {
    /// Creates an empty L1.
    ///
    /// # Arguments
    ///
    /// * `node_id` - Network identity.
    /// * `config` - Geometry and latencies.
    /// * `settings` - MSHR size and downstream credits.
    /// * `l2_map` - Home L2 bank for each line.
    /// * `clock` - Shared simulation clock.
    pub fn new(
        node_id: NodeId,
        config: &CacheConfig,
        settings: &CacheSettings,
        l2_map: Box<dyn DestMap>,
        clock: SimClock,
    ) -> Result<Self> {
        Ok(Self {
            core: CacheCore::new(node_id, config, settings, clock)?,
            l2_map,
            responses: Vec::new(),
        })
    }

    /// Shared cache state (tag store, MSHR, stall buffer, port, stats).
    pub const fn core(&self) -> &L1Core {
        &self.core
    }

    /// Client state of the line containing `addr`; `I` when not resident.
    pub fn client_state(&self, addr: PhysAddr) -> ClientState {
        self.core.fsm_for(addr).map_or(ClientState::I, MesiClient::state)
    }

    /// Accepts a load or store from the processor.
    ///
    /// The response is produced immediately on a hit, or later when the transaction
    /// completes; either way exactly once per request (see `take_responses`).
    pub fn handle_processor_request(&mut self, request: ProcRequest) -> Result<()> {
        match request.kind {
            AccessKind::Load => self.core.stats.processor_reads += 1,
            AccessKind::Store => self.core.stats.processor_writes += 1,
        }
        self.dispatch(request)?;
        self.drain_wakes()
    }

    /// Accepts a packet from the network: manager requests and replies, peer data, credits.
    pub fn handle_peer_and_manager_request(&mut self, packet: NetworkPacket) -> Result<()> {
        match packet.payload {
            Payload::Credit => {
                self.core.port.add_credit();
                Ok(())
            }
            Payload::Coherence(msg) => {
                self.handle_coherence(msg)?;
                self.drain_wakes()
            }
            Payload::Memory(_) => Err(CoherenceError::UnexpectedPacket {
                node: self.core.node_id,
                kind: packet.payload.kind(),
            }),
        }
    }

    /// Advances one cycle and returns the packets leaving the cache.
    pub fn tick(&mut self) -> Vec<NetworkPacket> {
        self.core.tick()
    }

    /// Removes and returns the processor responses produced so far.
    pub fn take_responses(&mut self) -> Vec<ProcResponse> {
        std::mem::take(&mut self.responses)
    }

    fn dispatch(&mut self, request: ProcRequest) -> Result<()> {
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
            return self.access_resident(slot, line, request);
        }
        if !self.core.mshr.can_allocate() {
            self.core.stall(request, line, StallReason::Mshr, WaitKey::AnyMshr);
            return Ok(());
        }
        match self.core.tags.reserve_block_for(line) {
            Reservation::Vacant(slot) => {
                self.open(line, slot, request);
                self.issue(slot, line, request)
            }
            Reservation::Occupied { slot, victim } => {
                if self.core.slot_busy(slot) {
                    self.core.stall(request, line, StallReason::LruBusy, WaitKey::Line(victim));
                    return Ok(());
                }
                self.open(line, slot, request);
                self.evict(slot, victim, line)
            }
        }
    }

    fn access_resident(&mut self, slot: SlotId, line: PhysAddr, request: ProcRequest) -> Result<()> {
        let client = &self.core.fsms[slot];
        if !client.state().is_stable() {
            // Only an eviction leaves a resident line transient without an MSHR entry.
            self.core.stall(request, line, StallReason::Trans, WaitKey::Line(line));
            return Ok(());
        }
        if client.hits(request.kind) {
            self.apply_hit(slot, line, request)?;
            self.core.stats.hits += 1;
            return Ok(());
        }
        if !self.core.mshr.can_allocate() {
            self.core.stall(request, line, StallReason::Mshr, WaitKey::AnyMshr);
            return Ok(());
        }
        self.open(line, slot, request);
        self.issue(slot, line, request)
    }

    /// Performs an access the client state already permits and responds.
    fn apply_hit(&mut self, slot: SlotId, line: PhysAddr, request: ProcRequest) -> Result<()> {
        let mut out = Vec::new();
        self.core.fsms[slot]
            .process(ClientEvent::access(request.kind), &mut out)
            .map_err(|e| e.at(self.core.node_id, line))?;
        debug_assert!(out.is_empty(), "a hit never sends");
        self.core.tags.touch(slot);
        self.respond(request);
        Ok(())
    }

    fn open(&mut self, line: PhysAddr, slot: SlotId, request: ProcRequest) {
        let opened = self.core.mshr.allocate(line, slot, request);
        debug_assert!(opened.is_ok(), "MSHR availability is checked before opening");
        self.core.stats.misses += 1;
    }

    /// Installs `line` into `slot` if needed and sends the request for `request`.
    fn issue(&mut self, slot: SlotId, line: PhysAddr, request: ProcRequest) -> Result<()> {
        if self.core.tags.line_of(slot).is_none() {
            self.core.tags.install(slot, line);
            self.core.fsms[slot] = MesiClient::new();
        }
        let mut out = Vec::new();
        self.core.fsms[slot]
            .process(ClientEvent::access(request.kind), &mut out)
            .map_err(|e| e.at(self.core.node_id, line))?;
        self.core.tags.touch(slot);
        self.send_all(line, out, request.kind);
        Ok(())
    }

    fn evict(&mut self, slot: SlotId, victim: PhysAddr, line: PhysAddr) -> Result<()> {
        self.core.stats.evictions += 1;
        let mut out = Vec::new();
        self.core.fsms[slot]
            .process(ClientEvent::Evict, &mut out)
            .map_err(|e| e.at(self.core.node_id, victim))?;
        debug!(
            node = %self.core.node_id,
            victim = %victim,
            line = %line,
            state = self.core.fsms[slot].state().name(),
            "evicting victim"
        );
        self.send_all(victim, out, AccessKind::Load);
        if self.core.fsms[slot].state().is_stable() {
            return self.finish_eviction(slot, victim, line);
        }
        self.core.evicting_for[slot] = Some(line);
        Ok(())
    }

    /// Frees the victim's slot and issues the line that was waiting for it.
    fn finish_eviction(&mut self, slot: SlotId, victim: PhysAddr, line: PhysAddr) -> Result<()> {
        let _ = self.core.tags.invalidate(slot);
        self.core.fsms[slot] = MesiClient::new();
        self.core.settle(victim);
        let Some(request) = self.core.mshr.get(line).map(|entry| entry.pending) else {
            warn!(node = %self.core.node_id, line = %line, "eviction finished with no waiting request");
            return Ok(());
        };
        self.issue(slot, line, request)
    }

    fn handle_coherence(&mut self, msg: CohMsg) -> Result<()> {
        let node = self.core.node_id;
        let line = msg.addr;
        trace!(node = %node, addr = %line, verb = msg.verb.name(), src = %msg.src, "message received");
        let Some(slot) = self.core.tags.lookup(line) else {
            return self.respond_with_default(msg);
        };

        let mut out = Vec::new();
        let event = ClientEvent::Message {
            verb: msg.verb,
            forward_id: msg.forward_id,
        };
        if let Err(rejected) = self.core.fsms[slot].process(event, &mut out) {
            let err = rejected.at(node, line);
            error!(%err, "coherence message rejected");
            return Err(err);
        }
        self.send_all(line, out, msg.rw);

        if !self.core.fsms[slot].state().is_stable() {
            return Ok(());
        }
        if self.core.mshr.get(line).is_some_and(|entry| entry.slot == slot) {
            return self.complete(slot, line);
        }
        if let Some(next) = self.core.evicting_for[slot].take() {
            return self.finish_eviction(slot, line, next);
        }
        if self.core.fsms[slot].state() == ClientState::I {
            let _ = self.core.tags.invalidate(slot);
        }
        Ok(())
    }

    /// Closes the transaction on `line` and completes the access that opened it.
    fn complete(&mut self, slot: SlotId, line: PhysAddr) -> Result<()> {
        let Some(entry) = self.core.release_mshr(line) else {
            return Ok(());
        };
        let request = entry.pending;
        let client = &self.core.fsms[slot];
        if !client.hits(request.kind) {
            let err = UnexpectedEvent {
                state: client.state().name(),
                event: request.kind.name(),
            }
            .at(self.core.node_id, line);
            error!(%err, "grant left the line unable to serve its access");
            return Err(err);
        }
        self.apply_hit(slot, line, request)
    }

    /// Response for a message that targets a line this cache does not hold.
    fn respond_with_default(&mut self, msg: CohMsg) -> Result<()> {
        let node = self.core.node_id;
        match msg.verb {
            CohVerb::DemandI => {
                let reply = CohMsg::new(CohVerb::UnblockI, msg.addr, node, msg.src);
                self.core.send(NetworkPacket::coherence(reply));
                Ok(())
            }
            CohVerb::FwdS | CohVerb::FwdE => {
                let err = UnexpectedEvent {
                    state: ClientState::I.name(),
                    event: msg.verb.name(),
                }
                .at(node, msg.addr);
                error!(%err, "forward for a line that is not held");
                Err(err)
            }
            verb => {
                self.core.stats.stale_drops += 1;
                debug!(node = %node, addr = %msg.addr, verb = verb.name(), "stale message dropped");
                Ok(())
            }
        }
    }

    fn send_all(&mut self, line: PhysAddr, out: Vec<ClientSend>, rw: AccessKind) {
        let node = self.core.node_id;
        for send in out {
            let msg = match send {
                ClientSend::Manager(verb) => CohMsg::new(verb, line, node, self.l2_map.lookup(line)),
                ClientSend::Peer { verb, dst } => CohMsg::new(verb, line, node, dst),
            }
            .with_rw(rw);
            trace!(node = %node, addr = %line, verb = msg.verb.name(), dst = %msg.dst, "message sent");
            self.core.send(NetworkPacket::coherence(msg));
        }
    }

    fn respond(&mut self, request: ProcRequest) {
        self.responses.push(ProcResponse {
            id: request.id,
            addr: request.addr,
            kind: request.kind,
            ready_at: self.core.clock.now() + self.core.tags.hit_latency(),
        });
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
