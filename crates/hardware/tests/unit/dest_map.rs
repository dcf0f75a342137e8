//! Destination Map Tests.

use cohsim_core::common::{CoherenceError, NodeId, PhysAddr};
use cohsim_core::net::{DestMap, PageBasedMap, SingleDestMap};
use rstest::rstest;

#[test]
fn single_map_ignores_address() {
    let map = SingleDestMap(NodeId(5));
    assert_eq!(map.lookup(PhysAddr::new(0)), NodeId(5));
    assert_eq!(map.lookup(PhysAddr::new(u64::MAX)), NodeId(5));
}

/// Four banks interleaved on 4 KiB pages.
#[rstest]
#[case(0x0000, 10)]
#[case(0x0fff, 10)]
#[case(0x1000, 11)]
#[case(0x2040, 12)]
#[case(0x3000, 13)]
#[case(0x4000, 10)]
fn page_interleaving(#[case] addr: u64, #[case] expected: usize) {
    let map = PageBasedMap::new((10..14).map(NodeId).collect(), 12).unwrap();
    assert_eq!(map.lookup(PhysAddr::new(addr)), NodeId(expected));
}

/// Three nodes use a two-bit selector; index 3 wraps to the first node.
#[rstest]
#[case(0, 0)]
#[case(1, 1)]
#[case(2, 2)]
#[case(3, 0)]
#[case(4, 0)]
fn non_power_of_two_wraps(#[case] page: u64, #[case] expected: usize) {
    let map = PageBasedMap::new(vec![NodeId(0), NodeId(1), NodeId(2)], 12).unwrap();
    assert_eq!(map.lookup(PhysAddr::new(page << 12)), NodeId(expected));
}

#[test]
fn single_node_always_selected() {
    let map = PageBasedMap::new(vec![NodeId(7)], 12).unwrap();
    for page in 0..16u64 {
        assert_eq!(map.lookup(PhysAddr::new(page << 12)), NodeId(7));
    }
}

#[test]
fn empty_map_is_rejected() {
    assert!(matches!(PageBasedMap::new(Vec::new(), 12), Err(CoherenceError::Config(_))));
}
