//! L2 Cache Tests.
//!
//! Drives a single L2 bank with hand-built client messages and memory fills, checking
//! the fetch path, forwards, recalls, replacement and stalls. The memory controller is a
//! mocked `DestMap` answering node 20.

use cohsim_core::cache::L2Cache;
use cohsim_core::cache::stall::StallReason;
use cohsim_core::coherence::{CohVerb, ManagerState, MemMsg, MemOp};
use cohsim_core::common::{CoherenceError, NodeId, PhysAddr};
use cohsim_core::config::CacheSettings;
use cohsim_core::net::NetworkPacket;
use cohsim_core::sim::SimClock;
use pretty_assertions::assert_eq;

use crate::common::harness::{coh, init_tracing, small_l2};
use crate::common::mocks::home_map;

const HOME: usize = 9;
const MC: usize = 20;

struct Fixture {
    l2: L2Cache,
    clock: SimClock,
}

impl Fixture {
    fn new(mshr_size: usize) -> Self {
        init_tracing();
        let clock = SimClock::new();
        let settings = CacheSettings {
            mshr_size,
            downstream_credits: 64,
        };
        let l2 = L2Cache::new(NodeId(HOME), &small_l2(), &settings, home_map(MC), clock.clone()).unwrap();
        Self { l2, clock }
    }

    /// Delivers a message from client `src`.
    fn from_client(&mut self, verb: CohVerb, addr: u64, src: usize) {
        self.l2.handle_incoming(coh(verb, addr, src, HOME)).unwrap();
    }

    /// Delivers the memory controller's fill for `addr`.
    fn fill(&mut self, addr: u64) {
        let request = MemMsg::request(MemOp::Ld, PhysAddr::new(addr), NodeId(HOME), NodeId(MC));
        self.l2.handle_incoming(NetworkPacket::memory(request.reply())).unwrap();
    }

    /// Brings `addr` into E owned by `client`.
    fn own(&mut self, addr: u64, client: usize) {
        self.from_client(CohVerb::IToS, addr, client);
        self.fill(addr);
        self.from_client(CohVerb::UnblockE, addr, client);
    }

    fn state(&self, addr: u64) -> ManagerState {
        self.l2.manager_state(PhysAddr::new(addr))
    }

    fn owner(&self, addr: u64) -> Option<NodeId> {
        self.l2.manager(PhysAddr::new(addr)).and_then(|m| m.owner())
    }

    fn sent(&self, verb: CohVerb) -> u64 {
        self.l2.core().stats().sent(verb)
    }
}

// ══════════════════════════════════════════════════════════
// 1. Fetch path
// ══════════════════════════════════════════════════════════

/// A miss installs the line, asks memory for it, and holds the request until the fill.
#[test]
fn miss_fetches_before_granting() {
    let mut f = Fixture::new(8);
    f.from_client(CohVerb::IToS, 0x1000, 0);
    assert_eq!(f.state(0x1000), ManagerState::I);
    assert_eq!(f.sent(CohVerb::GrantEData), 0);
    assert_eq!(f.l2.core().stats().mem_loads, 1);
    assert_eq!(f.l2.core().mshr().occupancy(), 1);

    f.clock.set(2);
    let out = f.l2.tick();
    assert_eq!(
        out,
        vec![NetworkPacket::memory(MemMsg::request(
            MemOp::Ld,
            PhysAddr::new(0x1000),
            NodeId(HOME),
            NodeId(MC)
        ))]
    );

    f.fill(0x1000);
    assert_eq!(f.state(0x1000), ManagerState::IE);
    assert_eq!(f.sent(CohVerb::GrantEData), 1);
    let slot = f.l2.core().tags().lookup(PhysAddr::new(0x1000)).unwrap();
    assert!(f.l2.core().tags().has_data(slot));

    f.from_client(CohVerb::UnblockE, 0x1000, 0);
    assert_eq!(f.state(0x1000), ManagerState::E);
    assert_eq!(f.owner(0x1000), Some(NodeId(0)));
    assert!(f.l2.core().mshr().is_empty());
}

#[test]
fn fill_without_transaction_is_ignored() {
    let mut f = Fixture::new(8);
    f.fill(0x1000);
    assert_eq!(f.state(0x1000), ManagerState::I);
    assert!(f.l2.core().is_idle());
}

// ══════════════════════════════════════════════════════════
// 2. Forwards and upgrades
// ══════════════════════════════════════════════════════════

/// A request arriving during the fetch waits, then is forwarded to the new owner.
#[test]
fn request_during_fetch_is_forwarded_after() {
    let mut f = Fixture::new(8);
    f.from_client(CohVerb::IToS, 0x1000, 0);
    f.from_client(CohVerb::IToS, 0x1000, 1);
    assert_eq!(f.l2.core().stats().stalls(StallReason::PrevPend), 1);

    f.fill(0x1000);
    f.from_client(CohVerb::UnblockE, 0x1000, 0);
    assert_eq!(f.state(0x1000), ManagerState::ES);
    assert_eq!(f.sent(CohVerb::FwdS), 1);

    f.from_client(CohVerb::Clean, 0x1000, 0);
    f.from_client(CohVerb::UnblockS, 0x1000, 1);
    assert_eq!(f.state(0x1000), ManagerState::S);
    assert!(f.l2.core().mshr().is_empty());
    assert_eq!(f.l2.core().stats().mem_loads, 1);
}

/// An upgrade among three sharers recalls the other two before granting.
#[test]
fn upgrade_recalls_sharers() {
    let mut f = Fixture::new(8);
    f.own(0x1000, 0);
    f.from_client(CohVerb::IToS, 0x1000, 1);
    f.from_client(CohVerb::UnblockS, 0x1000, 1);
    f.from_client(CohVerb::Clean, 0x1000, 0);
    f.from_client(CohVerb::IToS, 0x1000, 2);
    f.from_client(CohVerb::UnblockS, 0x1000, 2);
    assert_eq!(f.l2.manager(PhysAddr::new(0x1000)).unwrap().sharers().len(), 3);

    f.from_client(CohVerb::IToE, 0x1000, 0);
    assert_eq!(f.state(0x1000), ManagerState::SIE);
    assert_eq!(f.sent(CohVerb::DemandI), 2);

    f.from_client(CohVerb::UnblockI, 0x1000, 1);
    f.from_client(CohVerb::UnblockI, 0x1000, 2);
    assert_eq!(f.state(0x1000), ManagerState::IE);
    f.from_client(CohVerb::UnblockE, 0x1000, 0);
    assert_eq!(f.state(0x1000), ManagerState::E);
    assert_eq!(f.owner(0x1000), Some(NodeId(0)));
    assert!(f.l2.core().mshr().is_empty());
}

#[test]
fn ownership_transfer() {
    let mut f = Fixture::new(8);
    f.own(0x1000, 0);
    f.from_client(CohVerb::IToE, 0x1000, 1);
    assert_eq!(f.state(0x1000), ManagerState::EE);
    assert_eq!(f.sent(CohVerb::FwdE), 1);
    f.from_client(CohVerb::UnblockE, 0x1000, 1);
    assert_eq!(f.owner(0x1000), Some(NodeId(1)));
    assert!(f.l2.core().mshr().is_empty());
}

// ══════════════════════════════════════════════════════════
// 3. Client evictions
// ══════════════════════════════════════════════════════════

/// A dirty eviction from the owner writes the line back once the client confirms.
#[test]
fn dirty_eviction_writes_back() {
    let mut f = Fixture::new(8);
    f.own(0x1000, 0);
    f.from_client(CohVerb::MToI, 0x1000, 0);
    assert_eq!(f.state(0x1000), ManagerState::EiPut);
    assert_eq!(f.sent(CohVerb::GrantI), 1);

    f.from_client(CohVerb::UnblockI, 0x1000, 0);
    assert_eq!(f.state(0x1000), ManagerState::I);
    assert_eq!(f.l2.core().tags().occupancy(), 0);
    assert_eq!(f.l2.core().stats().mem_stores, 1);
    assert!(f.l2.core().mshr().is_empty());
}

#[test]
fn clean_eviction_skips_write_back() {
    let mut f = Fixture::new(8);
    f.own(0x1000, 0);
    f.from_client(CohVerb::EToI, 0x1000, 0);
    f.from_client(CohVerb::UnblockI, 0x1000, 0);
    assert_eq!(f.l2.core().stats().mem_stores, 0);
    assert_eq!(f.l2.core().tags().occupancy(), 0);
}

#[test]
fn eviction_of_absent_line_is_stale() {
    let mut f = Fixture::new(8);
    f.from_client(CohVerb::EToI, 0x1000, 0);
    assert_eq!(f.l2.core().stats().stale_drops, 1);
    assert_eq!(f.l2.core().stats().mem_loads, 0);
    assert!(f.l2.core().mshr().is_empty());
}

/// An eviction notice from a former owner closes its entry without effect.
#[test]
fn eviction_from_non_owner_is_stale() {
    let mut f = Fixture::new(8);
    f.own(0x1000, 0);
    f.from_client(CohVerb::EToI, 0x1000, 1);
    assert_eq!(f.state(0x1000), ManagerState::E);
    assert_eq!(f.l2.core().stats().stale_drops, 1);
    assert!(f.l2.core().mshr().is_empty());
}

// ══════════════════════════════════════════════════════════
// 4. Replacement and stalls
// ══════════════════════════════════════════════════════════

/// The fifth line in a set recalls the LRU owner and fetches into the freed slot.
#[test]
fn replacement_recalls_owner() {
    let mut f = Fixture::new(8);
    for (i, addr) in [0x1000, 0x2000, 0x3000, 0x4000].into_iter().enumerate() {
        f.own(addr, i % 3);
    }
    f.from_client(CohVerb::IToS, 0x5000, 1);
    assert_eq!(f.state(0x1000), ManagerState::EiEvict);
    assert_eq!(f.sent(CohVerb::DemandI), 1);
    assert_eq!(f.l2.core().stats().evictions, 1);

    f.from_client(CohVerb::UnblockIDirty, 0x1000, 0);
    assert_eq!(f.state(0x1000), ManagerState::I);
    assert_eq!(f.l2.core().stats().mem_stores, 1);
    assert_eq!(f.l2.core().stats().mem_loads, 5);

    f.fill(0x5000);
    f.from_client(CohVerb::UnblockE, 0x5000, 1);
    assert_eq!(f.owner(0x5000), Some(NodeId(1)));
    assert!(f.l2.core().mshr().is_empty());
}

/// A client eviction meeting the L2's own recall waits, then is dropped as stale.
#[test]
fn eviction_crossing_recall_is_dropped() {
    let mut f = Fixture::new(8);
    for addr in [0x1000, 0x2000, 0x3000, 0x4000] {
        f.own(addr, 0);
    }
    f.from_client(CohVerb::IToS, 0x5000, 1);
    f.from_client(CohVerb::EToI, 0x1000, 0);
    assert_eq!(f.l2.core().stats().stalls(StallReason::Trans), 1);

    f.from_client(CohVerb::UnblockI, 0x1000, 0);
    assert_eq!(f.l2.core().stats().stale_drops, 1);
    assert!(f.l2.core().stalls().is_empty());
    assert_eq!(f.sent(CohVerb::GrantI), 0);
}

/// With every way of the set mid-fetch the newcomer waits for the victim to settle.
#[test]
fn busy_victim_stalls_request() {
    let mut f = Fixture::new(8);
    for addr in [0x1000, 0x2000, 0x3000, 0x4000] {
        f.from_client(CohVerb::IToS, addr, 0);
    }
    f.from_client(CohVerb::IToS, 0x5000, 1);
    assert_eq!(f.l2.core().stats().stalls(StallReason::LruBusy), 1);
    assert_eq!(f.l2.core().stalls().len(), 1);
    assert_eq!(f.l2.core().stats().evictions, 0);
}

#[test]
fn exhausted_mshr_stalls_request() {
    let mut f = Fixture::new(1);
    f.from_client(CohVerb::IToS, 0x1000, 0);
    f.from_client(CohVerb::IToS, 0x1040, 1);
    assert_eq!(f.l2.core().stats().stalls(StallReason::Mshr), 1);
    assert_eq!(f.l2.core().stats().mem_loads, 1);

    f.fill(0x1000);
    f.from_client(CohVerb::UnblockE, 0x1000, 0);
    assert!(f.l2.core().stalls().is_empty());
    assert_eq!(f.l2.core().stats().mem_loads, 2);
}

// ══════════════════════════════════════════════════════════
// 5. Rejections
// ══════════════════════════════════════════════════════════

#[test]
fn client_bound_verb_is_a_violation() {
    let mut f = Fixture::new(8);
    let err = f.l2.handle_incoming(coh(CohVerb::GrantEData, 0x1000, 0, HOME)).unwrap_err();
    assert!(matches!(err, CoherenceError::ProtocolViolation { state: "L2", .. }));
}

#[test]
fn memory_request_is_rejected() {
    let mut f = Fixture::new(8);
    let packet = NetworkPacket::memory(MemMsg::request(MemOp::St, PhysAddr::new(0), NodeId(0), NodeId(HOME)));
    assert!(matches!(
        f.l2.handle_incoming(packet),
        Err(CoherenceError::UnexpectedPacket { .. })
    ));
}
