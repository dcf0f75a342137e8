//! Coherent cache components.
//!
//! This module implements the two cache levels of the hierarchy on top of one generic
//! core. It provides:
//! 1. **Structures:** Tag store, replacement policies, MSHR and stall buffer.
//! 2. **`CacheCore`:** The state both levels share, with an arena of per-line state
//!    machines indexed by tag-store slot.
//! 3. **L1 / L2:** Private client caches and shared manager caches.
//! 4. **`CacheNode`:** Tagged dispatch over the two levels for the harness.

/// Private L1 cache (client side).
pub mod l1;

/// Shared L2 cache (manager side).
pub mod l2;

/// Miss status holding registers.
pub mod mshr;

/// Cache replacement policy implementations (LRU, FIFO, Random).
pub mod policies;

/// Deferred-request queue.
pub mod stall;

/// Set-associative tag store.
pub mod tag_store;

use std::collections::VecDeque;

use tracing::debug;

pub use self::l1::L1Cache;
pub use self::l2::L2Cache;
use self::mshr::{Mshr, MshrEntry};
use self::stall::{StallBuffer, StallEntry, StallReason, WaitKey, Wake};
use self::tag_store::{SlotId, TagStore};
use crate::coherence::CoherenceFsm;
use crate::common::{NodeId, PhysAddr, Result};
use crate::config::{CacheConfig, CacheSettings};
use crate::net::{NetworkPacket, PortAdapter};
use crate::sim::clock::SimClock;
use crate::stats::CacheStats;

/// State shared by both cache levels.
///
/// `F` is the per-line state machine, `P` the MSHR payload and `R` the request type
/// parked in the stall buffer.
#[derive(Debug)]
pub struct CacheCore<F, P, R> {
    pub(crate) node_id: NodeId,
    pub(crate) tags: TagStore,
    pub(crate) fsms: Vec<F>,
    pub(crate) mshr: Mshr<P>,
    pub(crate) stalls: StallBuffer<R>,
    pub(crate) port: PortAdapter,
    pub(crate) stats: CacheStats,
    pub(crate) clock: SimClock,
    /// Per slot: the line waiting for this slot's victim to leave.
    pub(crate) evicting_for: Vec<Option<PhysAddr>>,
    pub(crate) wakes: VecDeque<Wake>,
    /// Sequence number and stall cycle of the entry being replayed, if any.
    pub(crate) replaying: Option<(u64, u64)>,
}

impl<F: CoherenceFsm, P, R> CacheCore<F, P, R> {
    /// Builds an empty cache core.
    ///
    /// # Arguments
    ///
    /// * `node_id` - Network identity of the cache.
    /// * `config` - Geometry, latencies and replacement policy.
    /// * `settings` - MSHR size and downstream credits.
    /// * `clock` - Shared simulation clock.
    pub fn new(node_id: NodeId, config: &CacheConfig, settings: &CacheSettings, clock: SimClock) -> Result<Self> {
        let tags = TagStore::new(config)?;
        let slots = tags.capacity();
        Ok(Self {
            node_id,
            fsms: (0..slots).map(|_| F::default()).collect(),
            evicting_for: vec![None; slots],
            tags,
            mshr: Mshr::new(settings.mshr_size),
            stalls: StallBuffer::new(),
            port: PortAdapter::new(settings.downstream_credits),
            stats: CacheStats::default(),
            clock,
            wakes: VecDeque::new(),
            replaying: None,
        })
    }

    /// Whether `slot` is part of any open transaction and must not be chosen as a victim.
    pub(crate) fn slot_busy(&self, slot: SlotId) -> bool {
        !self.fsms[slot].is_stable()
            || self.evicting_for[slot].is_some()
            || self.tags.line_of(slot).is_some_and(|line| self.mshr.has_match(line))
    }

    /// Parks `request` until `key` is satisfied.
    ///
    /// A request that stalls again while being replayed keeps its place in arrival order.
    pub(crate) fn stall(&mut self, request: R, addr: PhysAddr, reason: StallReason, key: WaitKey) {
        let replaying = self.replaying.take();
        let entry = StallEntry {
            request,
            addr,
            reason,
            key,
            stalled_at: replaying.map_or_else(|| self.clock.now(), |(_, at)| at),
        };
        match replaying {
            Some((seq, _)) => self.stalls.requeue(seq, entry),
            None => self.stalls.push(entry),
        }
        self.stats.record_stall(reason, self.stalls.len());
        debug!(node = %self.node_id, addr = %addr, reason = reason.name(), "request stalled");
    }

    /// Queues `packet` on the output port after the lookup latency.
    pub(crate) fn send(&mut self, packet: NetworkPacket) {
        if let Some(msg) = packet.as_coherence() {
            self.stats.record_sent(msg.verb);
        }
        let release_at = self.clock.now() + self.tags.lookup_latency();
        self.port.enqueue(packet, release_at);
    }

    /// Closes the transaction on `line` and schedules the wakes it causes.
    pub(crate) fn release_mshr(&mut self, line: PhysAddr) -> Option<MshrEntry<P>> {
        let entry = self.mshr.release(line)?;
        self.wakes.push_back(Wake::LineSettled(line));
        self.wakes.push_back(Wake::MshrReleased);
        Some(entry)
    }

    /// Schedules a wake for requests waiting on `line` (eviction finished).
    pub(crate) fn settle(&mut self, line: PhysAddr) {
        self.wakes.push_back(Wake::LineSettled(line));
    }

    /// Pops the next pending wake and returns the requests it releases with their
    /// sequence numbers.
    pub(crate) fn next_wake(&mut self) -> Option<Vec<(u64, StallEntry<R>)>> {
        let wake = self.wakes.pop_front()?;
        let woken = self.stalls.wake(wake);
        let now = self.clock.now();
        for (_, entry) in &woken {
            self.stats.record_replay(now.saturating_sub(entry.stalled_at));
        }
        Some(woken)
    }

    /// Samples occupancy and returns the packets the port may send this cycle.
    pub(crate) fn tick(&mut self) -> Vec<NetworkPacket> {
        self.stats.sample(self.tags.occupancy(), self.mshr.occupancy());
        self.port.drain_ready(self.clock.now())
    }

    /// Whether nothing is in flight, parked, or waiting for credit.
    pub fn is_idle(&self) -> bool {
        self.mshr.is_empty() && self.stalls.is_empty() && self.port.is_idle()
    }

    /// Network identity.
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Counters.
    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Tag store.
    pub const fn tags(&self) -> &TagStore {
        &self.tags
    }

    /// MSHR table.
    pub const fn mshr(&self) -> &Mshr<P> {
        &self.mshr
    }

    /// Stall buffer.
    pub const fn stalls(&self) -> &StallBuffer<R> {
        &self.stalls
    }

    /// Output port.
    pub const fn port(&self) -> &PortAdapter {
        &self.port
    }

    /// State machine of the line containing `addr`, if resident.
    pub fn fsm_for(&self, addr: PhysAddr) -> Option<&F> {
        let line = self.tags.line_addr(addr);
        self.tags.lookup(line).map(|slot| &self.fsms[slot])
    }

    /// Iterates over resident lines and their state machines.
    pub fn resident(&self) -> impl Iterator<Item = (PhysAddr, &F)> {
        self.fsms
            .iter()
            .enumerate()
            .filter_map(|(slot, fsm)| self.tags.line_of(slot).map(|line| (line, fsm)))
    }
}

/// A cache of either level, dispatched by tag.
#[derive(Debug)]
pub enum CacheNode {
    /// Private client cache.
    L1(L1Cache),
    /// Shared manager cache.
    L2(L2Cache),
}

impl CacheNode {
    /// Network identity.
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::L1(cache) => cache.core().node_id(),
            Self::L2(cache) => cache.core().node_id(),
        }
    }

    /// Delivers a packet from the network.
    pub fn handle_packet(&mut self, packet: NetworkPacket) -> Result<()> {
        match self {
            Self::L1(cache) => cache.handle_peer_and_manager_request(packet),
            Self::L2(cache) => cache.handle_incoming(packet),
        }
    }

    /// Advances one cycle and returns the packets leaving the cache.
    pub fn tick(&mut self) -> Vec<NetworkPacket> {
        match self {
            Self::L1(cache) => cache.tick(),
            Self::L2(cache) => cache.tick(),
        }
    }

    /// Whether nothing is in flight.
    pub fn is_idle(&self) -> bool {
        match self {
            Self::L1(cache) => cache.core().is_idle(),
            Self::L2(cache) => cache.core().is_idle(),
        }
    }

    /// Counters.
    pub fn stats(&self) -> &CacheStats {
        match self {
            Self::L1(cache) => cache.core().stats(),
            Self::L2(cache) => cache.core().stats(),
        }
    }

    /// The L1, if this is one.
    pub fn as_l1(&self) -> Option<&L1Cache> {
        match self {
            Self::L1(cache) => Some(cache),
            Self::L2(_) => None,
        }
    }

    /// The L2, if this is one.
    pub fn as_l2(&self) -> Option<&L2Cache> {
        match self {
            Self::L2(cache) => Some(cache),
            Self::L1(_) => None,
        }
    }

    /// Mutable L1, if this is one.
    pub fn as_l1_mut(&mut self) -> Option<&mut L1Cache> {
        match self {
            Self::L1(cache) => Some(cache),
            Self::L2(_) => None,
        }
    }
}
