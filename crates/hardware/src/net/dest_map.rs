//! Address to node mapping.
//!
//! An L1 uses a `DestMap` to find the home L2 bank of a line; an L2 uses another to
//! find the memory controller. Both are page-interleaved in the default system.

use std::fmt;

use crate::common::{CoherenceError, NodeId, PhysAddr, Result};

/// Selects the next-hop node for a line.
pub trait DestMap: fmt::Debug {
    /// Node responsible for `addr`.
    fn lookup(&self, addr: PhysAddr) -> NodeId;
}

/// Every address maps to the same node.
#[derive(Clone, Copy, Debug)]
pub struct SingleDestMap(pub NodeId);

impl DestMap for SingleDestMap {
    fn lookup(&self, _addr: PhysAddr) -> NodeId {
        self.0
    }
}

/// Page-interleaved selection: `nodes[(addr >> page_offset_bits) & mask]`.
///
/// The mask covers the next power of two of the node count; indices past the end wrap
/// around, so non power-of-two node counts are usable but not evenly loaded.
#[derive(Clone, Debug)]
pub struct PageBasedMap {
    nodes: Vec<NodeId>,
    page_offset_bits: u32,
    selector_mask: u64,
}

impl PageBasedMap {
    /// Creates a map over `nodes`.
    ///
    /// # Arguments
    ///
    /// * `nodes` - Candidate nodes, selected in order by page number.
    /// * `page_offset_bits` - log2 of the interleaving granularity.
    ///
    /// # Returns
    ///
    /// The map, or `Config` if `nodes` is empty.
    pub fn new(nodes: Vec<NodeId>, page_offset_bits: u32) -> Result<Self> {
        if nodes.is_empty() {
            return Err(CoherenceError::Config("destination map needs at least one node".to_string()));
        }
        let selector_mask = nodes.len().next_power_of_two() as u64 - 1;
        Ok(Self {
            nodes,
            page_offset_bits,
            selector_mask,
        })
    }
}

impl DestMap for PageBasedMap {
    fn lookup(&self, addr: PhysAddr) -> NodeId {
        let index = ((addr.val() >> self.page_offset_bits) & self.selector_mask) as usize;
        self.nodes[index % self.nodes.len()]
    }
}
