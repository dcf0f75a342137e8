//! Sharer set of a managed line.

use std::collections::BTreeSet;

use crate::common::NodeId;

/// Clients holding a shared copy of one line.
///
/// Iteration is in ascending node order, which keeps demand fan-out deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SharersList {
    nodes: BTreeSet<NodeId>,
}

impl SharersList {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `node`; returns `false` if it was already present.
    pub fn add(&mut self, node: NodeId) -> bool {
        self.nodes.insert(node)
    }

    /// Whether `node` holds a copy.
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Number of sharers.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nobody shares the line.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Removes every sharer.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Empties the set and returns its members in ascending order.
    pub fn take(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.nodes).into_iter().collect()
    }

    /// Iterates over sharers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }
}
