//! Two-level coherent system: processors, L1s, L2 banks and memory controllers.
//!
//! The system owns every node and a fixed-latency network between them. Node ids are
//! assigned L1s first, then L2 banks, then memory controllers. In a tiled system L2 bank
//! i shares node i with L1 i; packets carry a destination port to pick the unit, and
//! traffic between the two units of a tile is delivered at once with no credit.
//! Each cycle:
//! 1. **Deliver:** Packets whose link latency has elapsed reach their destination; the
//!    receiver's link returns one credit to the sending cache.
//! 2. **Issue:** Each processor presents at most one queued access to its L1, bounded by
//!    its outstanding-request limit.
//! 3. **Tick:** Caches and memory release the packets that are ready to leave.
//! 4. **Retire:** Processor responses whose latency has elapsed complete.

use std::collections::{BTreeMap, HashMap, VecDeque};

use tracing::{debug, info};

use super::clock::SimClock;
use super::memory::{MemoryNode, SimpleController};
use super::workload::TraceEntry;
use crate::cache::{CacheNode, L1Cache, L2Cache};
use crate::coherence::{AccessKind, ClientState, CohVerb, ManagerState, MemOp, ProcRequest, ProcResponse};
use crate::common::{CoherenceError, NodeId, PhysAddr, Result};
use crate::config::Config;
use crate::net::{NetworkPacket, PageBasedMap, Payload, PortId};

/// Load/store source attached to one L1.
#[derive(Debug, Default)]
struct Processor {
    queue: VecDeque<ProcRequest>,
    next_id: u64,
    outstanding: usize,
    in_flight: Vec<ProcResponse>,
    completed: Vec<ProcResponse>,
}

/// Complete simulated memory hierarchy.
#[derive(Debug)]
pub struct System {
    clock: SimClock,
    caches: Vec<CacheNode>,
    memories: Vec<MemoryNode>,
    processors: Vec<Processor>,
    network: BTreeMap<(u64, u64), NetworkPacket>,
    next_seq: u64,
    delivered: Vec<NetworkPacket>,
    local_deliveries: u64,
    num_l1: usize,
    num_l2: usize,
    tiled: bool,
    first_mc: usize,
    link_latency: u64,
    max_outstanding: usize,
    line_mask: u64,
}

impl System {
    /// Builds the system described by `config`.
    ///
    /// # Returns
    ///
    /// The system at cycle 0 with empty caches, or the first configuration error.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let sys = &config.system;
        let clock = SimClock::new();

        let l2_ids: Vec<NodeId> = (0..sys.num_l2).map(|i| NodeId(sys.l2_node(i))).collect();
        let mc_ids: Vec<NodeId> = (0..sys.num_mc).map(|i| NodeId(sys.mc_node(i))).collect();
        let page_bits = config.memory.page_offset_bits;

        let mut caches = Vec::with_capacity(sys.num_l1 + sys.num_l2);
        for i in 0..sys.num_l1 {
            let l2_map = PageBasedMap::new(l2_ids.clone(), page_bits)?;
            let l1 = L1Cache::new(
                NodeId(i),
                &config.l1,
                &config.l1_settings,
                Box::new(l2_map),
                clock.clone(),
            )?;
            caches.push(CacheNode::L1(l1));
        }
        for &id in &l2_ids {
            let mc_map = PageBasedMap::new(mc_ids.clone(), page_bits)?;
            let l2 = L2Cache::new(id, &config.l2, &config.l2_settings, Box::new(mc_map), clock.clone())?;
            caches.push(CacheNode::L2(l2));
        }
        let memories = mc_ids
            .iter()
            .map(|&id| MemoryNode::new(id, Box::new(SimpleController::new(config.memory.latency))))
            .collect();

        info!(
            l1 = sys.num_l1,
            l2 = sys.num_l2,
            mc = sys.num_mc,
            tiled = sys.tiled,
            line_bytes = config.l1.line_bytes,
            "system built"
        );
        Ok(Self {
            clock,
            caches,
            memories,
            processors: (0..sys.num_l1).map(|_| Processor::default()).collect(),
            network: BTreeMap::new(),
            next_seq: 0,
            delivered: Vec::new(),
            local_deliveries: 0,
            num_l1: sys.num_l1,
            num_l2: sys.num_l2,
            tiled: sys.tiled,
            first_mc: sys.mc_node(0),
            link_latency: config.network.link_latency,
            max_outstanding: sys.max_outstanding,
            line_mask: config.l1.line_bytes as u64 - 1,
        })
    }

    /// Current cycle.
    pub fn cycle(&self) -> u64 {
        self.clock.now()
    }

    /// Network id of L1 `index`.
    pub const fn l1_node(&self, index: usize) -> NodeId {
        NodeId(index)
    }

    /// Network id of L2 bank `index`.
    pub const fn l2_node(&self, index: usize) -> NodeId {
        if self.tiled { NodeId(index) } else { NodeId(self.num_l1 + index) }
    }

    /// L1 `index`.
    pub fn l1(&self, index: usize) -> Option<&L1Cache> {
        self.caches.get(index).and_then(CacheNode::as_l1)
    }

    /// L2 bank `index`.
    pub fn l2(&self, index: usize) -> Option<&L2Cache> {
        self.caches.get(self.num_l1 + index).and_then(CacheNode::as_l2)
    }

    /// Every cache, L1s first.
    pub fn caches(&self) -> &[CacheNode] {
        &self.caches
    }

    /// Memory controllers.
    pub fn memories(&self) -> &[MemoryNode] {
        &self.memories
    }

    /// Queues an access on the processor of L1 `l1`.
    ///
    /// # Returns
    ///
    /// The request id, or `UnknownNode` if there is no such L1.
    pub fn issue(&mut self, l1: usize, kind: AccessKind, addr: impl Into<PhysAddr>) -> Result<u64> {
        let processor = self.processors.get_mut(l1).ok_or(CoherenceError::UnknownNode(NodeId(l1)))?;
        let id = processor.next_id;
        processor.next_id += 1;
        processor.queue.push_back(ProcRequest {
            id,
            addr: addr.into(),
            kind,
        });
        Ok(id)
    }

    /// Queues every access of a trace.
    pub fn load(&mut self, trace: &[TraceEntry]) -> Result<()> {
        for entry in trace {
            let _ = self.issue(entry.l1, entry.kind, entry.addr)?;
        }
        Ok(())
    }

    /// Responses retired by the processor of L1 `l1`, in completion order.
    pub fn completed(&self, l1: usize) -> &[ProcResponse] {
        self.processors
            .get(l1)
            .map(|p| p.completed.as_slice())
            .unwrap_or_default()
    }

    /// Client state of `addr` in L1 `l1`.
    pub fn client_state(&self, l1: usize, addr: impl Into<PhysAddr>) -> ClientState {
        self.l1(l1).map_or(ClientState::I, |cache| cache.client_state(addr.into()))
    }

    /// Manager state of `addr` in its home L2 bank.
    pub fn manager_state(&self, addr: impl Into<PhysAddr>) -> ManagerState {
        let addr = addr.into();
        self.home_l2(addr).map_or(ManagerState::I, |l2| l2.manager_state(addr))
    }

    fn home_l2(&self, addr: PhysAddr) -> Option<&L2Cache> {
        self.caches[self.num_l1..]
            .iter()
            .filter_map(CacheNode::as_l2)
            .find(|l2| l2.manager(addr).is_some())
    }

    /// Every packet delivered so far, in delivery order (credits excluded).
    pub fn delivered(&self) -> &[NetworkPacket] {
        &self.delivered
    }

    /// Packets that went between the two units of a tile without using the network.
    pub const fn local_deliveries(&self) -> u64 {
        self.local_deliveries
    }

    /// Number of delivered coherence messages with `verb`.
    pub fn count_verb(&self, verb: CohVerb) -> usize {
        self.delivered
            .iter()
            .filter(|p| p.as_coherence().is_some_and(|m| m.verb == verb))
            .count()
    }

    /// Number of delivered memory requests of kind `op`.
    pub fn mem_ops(&self, op: MemOp) -> usize {
        self.memories
            .iter()
            .map(|m| match op {
                MemOp::Ld => m.stats().loads,
                MemOp::St => m.stats().stores,
            })
            .sum::<u64>() as usize
    }

    /// Whether no work remains anywhere in the system.
    pub fn is_idle(&self) -> bool {
        self.network.is_empty()
            && self.caches.iter().all(CacheNode::is_idle)
            && self.memories.iter().all(MemoryNode::is_idle)
            && self
                .processors
                .iter()
                .all(|p| p.queue.is_empty() && p.outstanding == 0)
    }

    /// Advances the whole system by one cycle.
    pub fn tick(&mut self) -> Result<()> {
        let now = self.clock.advance();

        while let Some(entry) = self.network.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let packet = entry.remove();
            self.deliver(packet, now)?;
        }

        for (index, processor) in self.processors.iter_mut().enumerate() {
            if processor.outstanding >= self.max_outstanding {
                continue;
            }
            let Some(request) = processor.queue.pop_front() else {
                continue;
            };
            processor.outstanding += 1;
            if let Some(l1) = self.caches[index].as_l1_mut() {
                l1.handle_processor_request(request)?;
            }
        }

        let mut outgoing = Vec::new();
        for cache in &mut self.caches {
            outgoing.extend(cache.tick());
        }
        for memory in &mut self.memories {
            outgoing.extend(memory.tick(now));
        }
        for packet in outgoing {
            if packet.is_local() {
                self.local_deliveries += 1;
                self.deliver(packet, now)?;
            } else {
                self.send(packet, now);
            }
        }

        for (index, processor) in self.processors.iter_mut().enumerate() {
            if let Some(l1) = self.caches[index].as_l1_mut() {
                processor.in_flight.extend(l1.take_responses());
            }
            let (done, waiting): (Vec<_>, Vec<_>) =
                processor.in_flight.drain(..).partition(|r| r.ready_at <= now);
            processor.in_flight = waiting;
            processor.outstanding -= done.len();
            processor.completed.extend(done);
        }
        Ok(())
    }

    /// Ticks until the system is idle.
    ///
    /// # Returns
    ///
    /// Cycles elapsed, or `Timeout` if the system is still busy after `max_cycles`.
    pub fn run_until_idle(&mut self, max_cycles: u64) -> Result<u64> {
        let start = self.clock.now();
        while !self.is_idle() {
            if self.clock.now() - start >= max_cycles {
                return Err(CoherenceError::Timeout(max_cycles));
            }
            self.tick()?;
        }
        let elapsed = self.clock.now() - start;
        debug!(cycles = elapsed, "system idle");
        Ok(elapsed)
    }

    fn send(&mut self, packet: NetworkPacket, now: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let _ = self.network.insert((now + self.link_latency, seq), packet);
    }

    fn deliver(&mut self, packet: NetworkPacket, now: u64) -> Result<()> {
        let (src, dst) = (packet.src, packet.dst);
        let credit_to = packet
            .src_port()
            .filter(|&port| port != PortId::Memory && !packet.is_local());
        if !matches!(packet.payload, Payload::Credit) {
            self.delivered.push(packet);
        }

        if let Some(index) = self.cache_index(dst, packet.dst_port) {
            self.caches[index].handle_packet(packet)?;
        } else if let Some(index) = self.memory_index(dst, packet.dst_port) {
            self.memories[index].handle_packet(packet, now)?;
        } else {
            return Err(CoherenceError::UnknownNode(dst));
        }

        if let Some(port) = credit_to {
            self.send(NetworkPacket::credit(dst, src, port), now);
        }
        Ok(())
    }

    /// Position in `caches` of the unit behind `port` on `node`.
    fn cache_index(&self, node: NodeId, port: PortId) -> Option<usize> {
        let n = node.index();
        match port {
            PortId::L1 => (n < self.num_l1).then_some(n),
            PortId::L2 => {
                let bank = if self.tiled { n } else { n.checked_sub(self.num_l1)? };
                (bank < self.num_l2).then_some(self.num_l1 + bank)
            }
            PortId::Memory => None,
        }
    }

    fn memory_index(&self, node: NodeId, port: PortId) -> Option<usize> {
        if port != PortId::Memory {
            return None;
        }
        let index = node.index().checked_sub(self.first_mc)?;
        (index < self.memories.len()).then_some(index)
    }

    /// Checks properties that hold at every cycle.
    ///
    /// 1. At most one L1 holds a line in E or M, and then no other L1 holds it in S.
    /// 2. No L2 manager has both an owner and sharers.
    /// 3. No MSHR exceeds its capacity.
    pub fn check_invariants(&self) -> Result<()> {
        let mut holders: HashMap<PhysAddr, (usize, usize)> = HashMap::new();
        for cache in &self.caches {
            match cache {
                CacheNode::L1(l1) => {
                    for (line, client) in l1.core().resident() {
                        let (owners, sharers) = holders.entry(line).or_default();
                        match client.state() {
                            ClientState::E | ClientState::M => *owners += 1,
                            ClientState::S => *sharers += 1,
                            _ => {}
                        }
                    }
                    Self::check_mshr(cache.node_id(), l1.core().mshr().occupancy(), l1.core().mshr().capacity())?;
                }
                CacheNode::L2(l2) => {
                    for (line, manager) in l2.core().resident() {
                        if !manager.holders_consistent() {
                            return Err(CoherenceError::Invariant(format!(
                                "{} line {line} has both an owner and sharers",
                                cache.node_id()
                            )));
                        }
                    }
                    Self::check_mshr(cache.node_id(), l2.core().mshr().occupancy(), l2.core().mshr().capacity())?;
                }
            }
        }
        for (line, (owners, sharers)) in holders {
            if owners > 1 || (owners == 1 && sharers > 0) {
                return Err(CoherenceError::Invariant(format!(
                    "line {line} has {owners} owners and {sharers} sharers"
                )));
            }
        }
        Ok(())
    }

    fn check_mshr(node: NodeId, occupancy: usize, capacity: usize) -> Result<()> {
        if occupancy > capacity {
            return Err(CoherenceError::Invariant(format!(
                "{node} MSHR holds {occupancy} entries, capacity {capacity}"
            )));
        }
        Ok(())
    }

    /// Checks that L2 directories agree with the L1s; meaningful only when idle.
    ///
    /// Every L1 owner must be the recorded owner of an `E` manager, and every L1 sharer
    /// must be in the sharer set of an `S` manager. Sharer sets may list clients that
    /// dropped the line silently.
    pub fn check_directory(&self) -> Result<()> {
        for (index, cache) in self.caches[..self.num_l1].iter().enumerate() {
            let Some(l1) = cache.as_l1() else { continue };
            let node = NodeId(index);
            for (line, client) in l1.core().resident() {
                let manager = self.home_l2(line).ok_or_else(|| {
                    CoherenceError::Invariant(format!("line {line} held by {node} is not in any L2"))
                })?;
                let Some(manager) = manager.manager(line) else { continue };
                let agrees = match client.state() {
                    ClientState::E | ClientState::M => {
                        manager.state() == ManagerState::E && manager.owner() == Some(node)
                    }
                    ClientState::S => manager.state() == ManagerState::S && manager.sharers().contains(node),
                    _ => true,
                };
                if !agrees {
                    return Err(CoherenceError::Invariant(format!(
                        "line {line}: {node} is {} but the manager is {}",
                        client.state().name(),
                        manager.state().name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Byte address of the line containing `addr`.
    pub const fn line_of(&self, addr: PhysAddr) -> PhysAddr {
        addr.align_down(self.line_mask)
    }

    /// Prints the statistics report for every node.
    pub fn print_stats(&self) {
        println!("==========================================================");
        println!("COHERENCE SIMULATION STATISTICS");
        println!("==========================================================");
        println!("cycles                   {}", self.clock.now());
        for (index, cache) in self.caches.iter().enumerate() {
            let name = if index < self.num_l1 {
                format!("L1[{index}] ({})", cache.node_id())
            } else {
                format!("L2[{}] ({})", index - self.num_l1, cache.node_id())
            };
            cache.stats().print(&name);
        }
        for memory in &self.memories {
            let stats = memory.stats();
            println!("----------------------------------------------------------");
            println!("MC ({})", memory.node_id());
            println!("  loads                  {}", stats.loads);
            println!("  stores                 {}", stats.stores);
        }
        println!("==========================================================");
    }
}
