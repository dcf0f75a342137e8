//! Least Recently Used (LRU) Replacement Policy.
//!
//! Each set keeps a recency stack: index 0 is the most recently used way, the
//! last index is the victim. Releasing a way moves it straight to the bottom so
//! that freed ways are reused before any resident line is disturbed.
//!
//! # Performance
//!
//! - `touch()` / `release()`: O(W) where W is the associativity
//! - `victim()`: O(1)

use super::ReplacementPolicy;

/// LRU Policy state.
#[derive(Debug, Clone)]
pub struct LruPolicy {
    /// Recency stack per set; front is MRU, back is LRU.
    stacks: Vec<Vec<usize>>,
}

impl LruPolicy {
    /// Creates a new LRU policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of sets in the cache.
    /// * `ways` - The associativity (number of ways) of the cache.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            stacks: (0..sets).map(|_| (0..ways).collect()).collect(),
        }
    }

    fn detach(&mut self, set: usize, way: usize) -> &mut Vec<usize> {
        let stack = &mut self.stacks[set];
        if let Some(pos) = stack.iter().position(|&w| w == way) {
            let _ = stack.remove(pos);
        }
        stack
    }
}

impl ReplacementPolicy for LruPolicy {
    fn touch(&mut self, set: usize, way: usize) {
        self.detach(set, way).insert(0, way);
    }

    fn release(&mut self, set: usize, way: usize) {
        self.detach(set, way).push(way);
    }

    fn victim(&mut self, set: usize) -> usize {
        self.stacks[set].last().copied().unwrap_or(0)
    }
}
