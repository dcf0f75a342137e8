//! Tag Store Unit Tests.
//!
//! Verifies address decoding, lookup, slot reservation and the replacement order
//! for a small set-associative geometry.

use cohsim_core::cache::tag_store::{Reservation, TagStore};
use cohsim_core::common::{CoherenceError, PhysAddr};
use cohsim_core::config::{CacheConfig, ReplacementPolicy};

use crate::common::harness::tiny_l1;

/// 512 bytes, 64-byte lines, 2 ways: 4 sets.
///
/// Set index = (addr >> 6) & 3, tag = addr >> 8.
fn four_sets() -> CacheConfig {
    CacheConfig {
        size_bytes: 512,
        line_bytes: 64,
        ways: 2,
        policy: ReplacementPolicy::Lru,
        hit_latency: 3,
        lookup_latency: 2,
    }
}

fn addr(a: u64) -> PhysAddr {
    PhysAddr::new(a)
}

/// Installs the line at `a` into the slot the store offers for it and marks it used.
fn fill(tags: &mut TagStore, a: u64) -> usize {
    match tags.reserve_block_for(addr(a)) {
        Reservation::Vacant(slot) => {
            tags.install(slot, addr(a));
            tags.touch(slot);
            slot
        }
        Reservation::Occupied { .. } => panic!("set already full"),
    }
}

// ══════════════════════════════════════════════════════════
// 1. Geometry
// ══════════════════════════════════════════════════════════

#[test]
fn geometry_is_derived_from_config() {
    let tags = TagStore::new(&four_sets()).unwrap();
    assert_eq!(tags.num_sets(), 4);
    assert_eq!(tags.ways(), 2);
    assert_eq!(tags.capacity(), 8);
    assert_eq!(tags.hit_latency(), 3);
    assert_eq!(tags.lookup_latency(), 2);
    assert_eq!(tags.offset_mask(), 0x3f);
    assert_eq!(tags.tag_mask(), !0xff);
}

#[test]
fn line_addr_aligns_down() {
    let tags = TagStore::new(&four_sets()).unwrap();
    assert_eq!(tags.line_addr(addr(0x1234)), addr(0x1200));
    assert_eq!(tags.line_addr(addr(0x123f)), addr(0x1200));
    assert_eq!(tags.line_addr(addr(0x1240)), addr(0x1240));
}

#[test]
fn invalid_geometry_is_rejected() {
    let mut config = four_sets();
    config.size_bytes = 384;
    assert!(matches!(TagStore::new(&config), Err(CoherenceError::InvalidGeometry(_))));
}

// ══════════════════════════════════════════════════════════
// 2. Lookup and install
// ══════════════════════════════════════════════════════════

#[test]
fn empty_store_misses() {
    let tags = TagStore::new(&four_sets()).unwrap();
    assert_eq!(tags.lookup(addr(0x1000)), None);
    assert_eq!(tags.occupancy(), 0);
}

/// Any byte of an installed line finds the same slot.
#[test]
fn install_then_lookup_any_offset() {
    let mut tags = TagStore::new(&four_sets()).unwrap();
    let slot = fill(&mut tags, 0x1040);
    assert_eq!(tags.lookup(addr(0x1040)), Some(slot));
    assert_eq!(tags.lookup(addr(0x107f)), Some(slot));
    assert_eq!(tags.lookup(addr(0x1080)), None);
    assert_eq!(tags.line_of(slot), Some(addr(0x1040)));
    assert_eq!(tags.occupancy(), 1);
}

/// Lines in different sets never compete for a slot.
#[test]
fn lines_land_in_their_set() {
    let mut tags = TagStore::new(&four_sets()).unwrap();
    let a = fill(&mut tags, 0x0000);
    let b = fill(&mut tags, 0x0040);
    assert_eq!(a / 2, 0);
    assert_eq!(b / 2, 1);
}

#[test]
fn dirty_and_data_bits_reset_on_install() {
    let mut tags = TagStore::new(&four_sets()).unwrap();
    let slot = fill(&mut tags, 0x2000);
    assert!(!tags.is_dirty(slot));
    assert!(!tags.has_data(slot));
    tags.mark_dirty(slot);
    tags.set_have_data(slot);
    assert!(tags.is_dirty(slot));
    assert!(tags.has_data(slot));
}

#[test]
fn invalidate_reports_dirty_once() {
    let mut tags = TagStore::new(&four_sets()).unwrap();
    let slot = fill(&mut tags, 0x2000);
    tags.mark_dirty(slot);
    assert!(tags.invalidate(slot));
    assert!(!tags.invalidate(slot));
    assert_eq!(tags.lookup(addr(0x2000)), None);
    assert_eq!(tags.line_of(slot), None);
    assert_eq!(tags.occupancy(), 0);
}

// ══════════════════════════════════════════════════════════
// 3. Reservation
// ══════════════════════════════════════════════════════════

#[test]
fn reserve_prefers_invalid_way() {
    let mut tags = TagStore::new(&tiny_l1()).unwrap();
    let first = fill(&mut tags, 0x1000);
    match tags.reserve_block_for(addr(0x2000)) {
        Reservation::Vacant(slot) => assert_ne!(slot, first),
        other => panic!("expected a vacant slot, got {other:?}"),
    }
}

/// With a full set the least recently used line is offered as the victim.
#[test]
fn reserve_offers_lru_victim() {
    let mut tags = TagStore::new(&tiny_l1()).unwrap();
    let a = fill(&mut tags, 0x1000);
    let b = fill(&mut tags, 0x2000);
    assert_eq!(
        tags.reserve_block_for(addr(0x3000)),
        Reservation::Occupied {
            slot: a,
            victim: addr(0x1000)
        }
    );

    tags.touch(a);
    assert_eq!(
        tags.reserve_block_for(addr(0x3000)),
        Reservation::Occupied {
            slot: b,
            victim: addr(0x2000)
        }
    );
}

/// Reservation alone changes nothing visible.
#[test]
fn reserve_does_not_evict() {
    let mut tags = TagStore::new(&tiny_l1()).unwrap();
    let _ = fill(&mut tags, 0x1000);
    let _ = fill(&mut tags, 0x2000);
    let _ = tags.reserve_block_for(addr(0x3000));
    assert!(tags.lookup(addr(0x1000)).is_some());
    assert!(tags.lookup(addr(0x2000)).is_some());
    assert_eq!(tags.occupancy(), 2);
}

/// A freed slot is reused before any victim is chosen.
#[test]
fn freed_slot_is_reused() {
    let mut tags = TagStore::new(&tiny_l1()).unwrap();
    let a = fill(&mut tags, 0x1000);
    let _ = fill(&mut tags, 0x2000);
    let _ = tags.invalidate(a);
    assert_eq!(tags.reserve_block_for(addr(0x3000)), Reservation::Vacant(a));
}
