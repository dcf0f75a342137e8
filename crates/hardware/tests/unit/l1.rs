//! L1 Cache Tests.
//!
//! Drives a single L1 by hand: processor requests go in, hand-built manager and peer
//! packets come back, and the test inspects client states, stalls, responses and the
//! messages the cache queued. The home L2 is a mocked `DestMap` answering node 9.

use cohsim_core::cache::L1Cache;
use cohsim_core::cache::stall::StallReason;
use cohsim_core::coherence::{AccessKind, ClientState, CohVerb, MemMsg, MemOp, ProcRequest};
use cohsim_core::common::{CoherenceError, NodeId, PhysAddr};
use cohsim_core::config::CacheSettings;
use cohsim_core::net::{NetworkPacket, PortId};
use cohsim_core::sim::SimClock;
use pretty_assertions::assert_eq;

use crate::common::harness::{coh, fwd, init_tracing, tiny_l1};
use crate::common::mocks::home_map;

const SELF: usize = 0;
const HOME: usize = 9;
const PEER: usize = 1;

struct Fixture {
    l1: L1Cache,
    clock: SimClock,
    next_id: u64,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let clock = SimClock::new();
        let settings = CacheSettings {
            mshr_size: 2,
            downstream_credits: 16,
        };
        let l1 = L1Cache::new(NodeId(SELF), &tiny_l1(), &settings, home_map(HOME), clock.clone()).unwrap();
        Self { l1, clock, next_id: 0 }
    }

    fn access(&mut self, kind: AccessKind, addr: u64) -> u64 {
        self.next_id += 1;
        let request = ProcRequest {
            id: self.next_id,
            addr: PhysAddr::new(addr),
            kind,
        };
        self.l1.handle_processor_request(request).unwrap();
        self.next_id
    }

    fn load(&mut self, addr: u64) -> u64 {
        self.access(AccessKind::Load, addr)
    }

    fn store(&mut self, addr: u64) -> u64 {
        self.access(AccessKind::Store, addr)
    }

    /// Delivers a message from the home L2.
    fn from_home(&mut self, verb: CohVerb, addr: u64) {
        self.l1.handle_peer_and_manager_request(coh(verb, addr, HOME, SELF)).unwrap();
    }

    fn state(&self, addr: u64) -> ClientState {
        self.l1.client_state(PhysAddr::new(addr))
    }

    fn sent(&self, verb: CohVerb) -> u64 {
        self.l1.core().stats().sent(verb)
    }

    fn completed(&mut self) -> Vec<u64> {
        self.l1.take_responses().into_iter().map(|r| r.id).collect()
    }

    /// Brings `addr` into E through a cold load miss.
    fn fill_exclusive(&mut self, addr: u64) {
        let _ = self.load(addr);
        self.from_home(CohVerb::GrantEData, addr);
        let _ = self.completed();
    }
}

// ══════════════════════════════════════════════════════════
// 1. Misses and hits
// ══════════════════════════════════════════════════════════

/// A cold load opens a transaction and sends `I_to_S` after the lookup latency.
#[test]
fn cold_load_sends_request_to_home() {
    let mut f = Fixture::new();
    let _ = f.load(0x1008);
    assert_eq!(f.state(0x1000), ClientState::IE);
    assert_eq!(f.l1.core().mshr().occupancy(), 1);
    assert!(f.l1.take_responses().is_empty());

    assert!(f.l1.tick().is_empty());
    f.clock.set(1);
    assert_eq!(f.l1.tick(), vec![coh(CohVerb::IToS, 0x1000, SELF, HOME)]);
}

/// The grant completes the access and is acknowledged with `UNBLOCK_E`.
#[test]
fn exclusive_grant_completes_load() {
    let mut f = Fixture::new();
    let id = f.load(0x1008);
    f.clock.set(5);
    f.from_home(CohVerb::GrantEData, 0x1000);

    assert_eq!(f.state(0x1000), ClientState::E);
    assert!(f.l1.core().mshr().is_empty());
    let responses = f.l1.take_responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, id);
    assert_eq!(responses[0].addr, PhysAddr::new(0x1008));
    assert_eq!(responses[0].ready_at, 6);
    assert_eq!(f.sent(CohVerb::UnblockE), 1);
}

#[test]
fn shared_grant_leaves_line_shared() {
    let mut f = Fixture::new();
    let _ = f.load(0x1000);
    f.from_home(CohVerb::GrantSData, 0x1000);
    assert_eq!(f.state(0x1000), ClientState::S);
    assert_eq!(f.sent(CohVerb::UnblockS), 1);
    assert_eq!(f.completed().len(), 1);
}

/// Hits respond immediately and send nothing.
#[test]
fn hits_need_no_messages() {
    let mut f = Fixture::new();
    f.fill_exclusive(0x1000);
    let before = f.l1.core().port().pending();

    let load = f.load(0x1010);
    let store = f.store(0x1020);
    assert_eq!(f.completed(), vec![load, store]);
    assert_eq!(f.state(0x1000), ClientState::M);
    assert_eq!(f.l1.core().port().pending(), before);

    let stats = f.l1.core().stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.processor_reads, 2);
    assert_eq!(stats.processor_writes, 1);
}

/// A store to a shared line upgrades; the access completes once exclusive data arrives.
#[test]
fn store_to_shared_line_upgrades() {
    let mut f = Fixture::new();
    let _ = f.load(0x1000);
    f.from_home(CohVerb::GrantSData, 0x1000);
    let _ = f.completed();

    let id = f.store(0x1000);
    assert_eq!(f.state(0x1000), ClientState::SE);
    assert_eq!(f.sent(CohVerb::IToE), 1);
    assert!(f.completed().is_empty());

    f.from_home(CohVerb::GrantEData, 0x1000);
    assert_eq!(f.state(0x1000), ClientState::M);
    assert_eq!(f.completed(), vec![id]);
}

/// A recall overtaking an upgrade turns it into a full miss that still completes.
#[test]
fn recall_during_upgrade() {
    let mut f = Fixture::new();
    let _ = f.load(0x1000);
    f.from_home(CohVerb::GrantSData, 0x1000);
    let _ = f.completed();
    let id = f.store(0x1000);

    f.from_home(CohVerb::DemandI, 0x1000);
    assert_eq!(f.state(0x1000), ClientState::IE);
    assert_eq!(f.sent(CohVerb::UnblockI), 1);
    assert!(f.completed().is_empty());

    f.from_home(CohVerb::GrantEData, 0x1000);
    assert_eq!(f.state(0x1000), ClientState::M);
    assert_eq!(f.completed(), vec![id]);
}

/// Peer data satisfies a pending miss just like a grant.
#[test]
fn peer_data_completes_store_miss() {
    let mut f = Fixture::new();
    let id = f.store(0x1000);
    f.l1.handle_peer_and_manager_request(coh(CohVerb::MData, 0x1000, PEER, SELF))
        .unwrap();
    assert_eq!(f.state(0x1000), ClientState::M);
    assert_eq!(f.completed(), vec![id]);
    assert_eq!(f.sent(CohVerb::UnblockE), 1);
}

// ══════════════════════════════════════════════════════════
// 2. Stalls
// ══════════════════════════════════════════════════════════

/// A second access to a line with a transaction in flight waits and replays in order.
#[test]
fn same_line_access_waits_for_transaction() {
    let mut f = Fixture::new();
    let first = f.load(0x1000);
    let second = f.store(0x1004);
    assert_eq!(f.l1.core().stats().stalls(StallReason::PrevPend), 1);
    assert_eq!(f.l1.core().stalls().len(), 1);
    assert_eq!(f.sent(CohVerb::IToS), 1);

    f.from_home(CohVerb::GrantEData, 0x1000);
    assert_eq!(f.completed(), vec![first, second]);
    assert_eq!(f.state(0x1000), ClientState::M);
    assert!(f.l1.core().stalls().is_empty());
    assert_eq!(f.l1.core().stats().replays, 1);
}

/// MSHR exhaustion parks the access; its later replay meets a busy victim, waits again,
/// and finally evicts the line that became least recently used.
#[test]
fn mshr_then_busy_victim_then_eviction() {
    let mut f = Fixture::new();
    let a = f.load(0x1000);
    let b = f.load(0x2000);
    let _c = f.load(0x3000);
    assert_eq!(f.l1.core().stats().stalls(StallReason::Mshr), 1);

    // Freeing an entry replays the access; the LRU victim is 0x2000, still in flight.
    f.from_home(CohVerb::GrantEData, 0x1000);
    assert_eq!(f.completed(), vec![a]);
    assert_eq!(f.l1.core().stats().stalls(StallReason::LruBusy), 1);
    assert_eq!(f.state(0x3000), ClientState::I);

    // Once 0x2000 settles the victim becomes 0x1000, which is evicted.
    f.from_home(CohVerb::GrantEData, 0x2000);
    assert_eq!(f.completed(), vec![b]);
    assert_eq!(f.state(0x1000), ClientState::EI);
    assert_eq!(f.sent(CohVerb::EToI), 1);
    assert_eq!(f.l1.core().stats().evictions, 1);

    f.from_home(CohVerb::GrantI, 0x1000);
    assert_eq!(f.state(0x1000), ClientState::I);
    assert_eq!(f.state(0x3000), ClientState::IE);
    assert_eq!(f.sent(CohVerb::UnblockI), 1);
    assert_eq!(f.sent(CohVerb::IToS), 3);
}

/// An access that stalls again on replay stays ahead of requests parked after it and
/// keeps its original stall cycle.
#[test]
fn restalled_access_keeps_arrival_order() {
    let mut f = Fixture::new();
    let a = f.load(0x1000);
    let b = f.load(0x2000);
    let c = f.load(0x3000);
    f.clock.set(2);
    let d = f.load(0x2004);
    assert_eq!(f.l1.core().stats().stalls(StallReason::Mshr), 1);
    assert_eq!(f.l1.core().stats().stalls(StallReason::PrevPend), 1);

    // The replayed access finds its victim 0x2000 busy and waits on that line again.
    f.clock.set(5);
    f.from_home(CohVerb::GrantEData, 0x1000);
    assert_eq!(f.completed(), vec![a]);
    assert_eq!(f.l1.core().stats().stalls(StallReason::LruBusy), 1);
    let parked: Vec<_> = f.l1.core().stalls().iter().map(|e| (e.request.id, e.stalled_at)).collect();
    assert_eq!(parked, vec![(c, 0), (d, 2)]);
    assert_eq!(f.l1.core().stats().max_stall_age, 5);

    f.clock.set(9);
    f.from_home(CohVerb::GrantEData, 0x2000);
    assert_eq!(f.completed(), vec![b, d]);
    assert_eq!(f.state(0x1000), ClientState::EI);
    assert_eq!(f.l1.core().stats().replays, 3);
    assert_eq!(f.l1.core().stats().max_stall_age, 9);
}

/// An access to a line being evicted waits until the eviction finishes.
#[test]
fn access_to_evicting_line_waits() {
    let mut f = Fixture::new();
    f.fill_exclusive(0x1000);
    f.fill_exclusive(0x2000);
    let _ = f.load(0x3000);
    assert_eq!(f.state(0x1000), ClientState::EI);

    let _ = f.load(0x1000);
    assert_eq!(f.l1.core().stats().stalls(StallReason::Trans), 1);

    // The eviction completes; the replayed access now needs 0x2000's slot.
    f.from_home(CohVerb::GrantI, 0x1000);
    assert_eq!(f.state(0x3000), ClientState::IE);
    assert_eq!(f.state(0x2000), ClientState::EI);
    assert!(f.l1.core().stalls().is_empty());
}

/// Replacing a shared line is silent.
#[test]
fn shared_victim_is_dropped_silently() {
    let mut f = Fixture::new();
    let _ = f.load(0x1000);
    f.from_home(CohVerb::GrantSData, 0x1000);
    f.fill_exclusive(0x2000);
    let _ = f.load(0x3000);
    assert_eq!(f.state(0x1000), ClientState::I);
    assert_eq!(f.state(0x3000), ClientState::IE);
    assert_eq!(f.sent(CohVerb::EToI), 0);
    assert_eq!(f.sent(CohVerb::IToS), 3);
}

#[test]
fn modified_victim_sends_dirty_eviction() {
    let mut f = Fixture::new();
    let _ = f.store(0x1000);
    f.from_home(CohVerb::GrantEData, 0x1000);
    f.fill_exclusive(0x2000);
    let _ = f.load(0x3000);
    assert_eq!(f.state(0x1000), ClientState::MI);
    assert_eq!(f.sent(CohVerb::MToI), 1);
}

// ══════════════════════════════════════════════════════════
// 3. Forwards and recalls
// ══════════════════════════════════════════════════════════

#[test]
fn exclusive_forward_hands_line_to_peer() {
    let mut f = Fixture::new();
    f.fill_exclusive(0x1000);
    f.l1.handle_peer_and_manager_request(fwd(CohVerb::FwdE, 0x1000, HOME, SELF, PEER))
        .unwrap();
    assert_eq!(f.state(0x1000), ClientState::I);
    assert_eq!(f.l1.core().tags().occupancy(), 0);
    assert_eq!(f.sent(CohVerb::EData), 1);
}

/// A modified owner asked to share supplies data and writes back to the home.
#[test]
fn share_forward_on_modified_line() {
    let mut f = Fixture::new();
    let _ = f.store(0x1000);
    f.from_home(CohVerb::GrantEData, 0x1000);
    f.l1.handle_peer_and_manager_request(fwd(CohVerb::FwdS, 0x1000, HOME, SELF, PEER))
        .unwrap();
    assert_eq!(f.state(0x1000), ClientState::S);
    assert_eq!(f.sent(CohVerb::SData), 1);
    assert_eq!(f.sent(CohVerb::Writeback), 1);
}

/// A forward that overtakes our own eviction is answered from the evicting copy.
#[test]
fn forward_racing_eviction() {
    let mut f = Fixture::new();
    f.fill_exclusive(0x1000);
    f.fill_exclusive(0x2000);
    let _ = f.load(0x3000);
    assert_eq!(f.state(0x1000), ClientState::EI);

    f.l1.handle_peer_and_manager_request(fwd(CohVerb::FwdE, 0x1000, HOME, SELF, PEER))
        .unwrap();
    assert_eq!(f.sent(CohVerb::EData), 1);
    assert_eq!(f.state(0x1000), ClientState::I);
    assert_eq!(f.state(0x3000), ClientState::IE);
}

/// A recall for a line we no longer hold is still acknowledged.
#[test]
fn recall_of_absent_line_is_acknowledged() {
    let mut f = Fixture::new();
    f.from_home(CohVerb::DemandI, 0x5000);
    f.clock.set(1);
    assert_eq!(f.l1.tick(), vec![coh(CohVerb::UnblockI, 0x5000, SELF, HOME)]);
}

#[test]
fn forward_for_absent_line_is_a_violation() {
    let mut f = Fixture::new();
    let err = f
        .l1
        .handle_peer_and_manager_request(fwd(CohVerb::FwdS, 0x5000, HOME, SELF, PEER))
        .unwrap_err();
    assert!(matches!(
        err,
        CoherenceError::ProtocolViolation { state: "I", event: "FWD_S", .. }
    ));
}

#[test]
fn stale_grant_is_dropped() {
    let mut f = Fixture::new();
    f.from_home(CohVerb::GrantI, 0x5000);
    assert_eq!(f.l1.core().stats().stale_drops, 1);
    assert!(f.l1.core().is_idle());
}

#[test]
fn undefined_transition_is_reported() {
    let mut f = Fixture::new();
    f.fill_exclusive(0x1000);
    let err = f
        .l1
        .handle_peer_and_manager_request(coh(CohVerb::GrantSData, 0x1000, HOME, SELF))
        .unwrap_err();
    assert!(matches!(err, CoherenceError::ProtocolViolation { state: "E", .. }));
}

// ══════════════════════════════════════════════════════════
// 4. Packets and credits
// ══════════════════════════════════════════════════════════

#[test]
fn memory_packets_are_rejected() {
    let mut f = Fixture::new();
    let packet = NetworkPacket::memory(MemMsg::request(MemOp::Ld, PhysAddr::new(0), NodeId(HOME), NodeId(SELF)));
    assert!(matches!(
        f.l1.handle_peer_and_manager_request(packet),
        Err(CoherenceError::UnexpectedPacket { kind: "memory", .. })
    ));
}

/// Returned credits let held packets leave.
#[test]
fn credits_return_through_the_network() {
    init_tracing();
    let clock = SimClock::new();
    let settings = CacheSettings {
        mshr_size: 4,
        downstream_credits: 1,
    };
    let mut l1 = L1Cache::new(NodeId(SELF), &tiny_l1(), &settings, home_map(HOME), clock.clone()).unwrap();
    for (id, addr) in [(1, 0x1000), (2, 0x2000)] {
        l1.handle_processor_request(ProcRequest {
            id,
            addr: PhysAddr::new(addr),
            kind: AccessKind::Load,
        })
        .unwrap();
    }
    clock.set(1);
    assert_eq!(l1.tick().len(), 1);
    assert!(l1.tick().is_empty());
    l1.handle_peer_and_manager_request(NetworkPacket::credit(NodeId(HOME), NodeId(SELF), PortId::L1))
        .unwrap();
    assert_eq!(l1.tick(), vec![coh(CohVerb::IToS, 0x2000, SELF, HOME)]);
}
