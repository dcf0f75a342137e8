//! Random Replacement Policy.
//!
//! Picks a pseudo-random way with a xorshift generator. The seed is fixed so that
//! two runs of the same workload evict the same lines.

use super::ReplacementPolicy;

const SEED: u64 = 123_456_789;

/// Random Policy state.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    ways: usize,
    state: u64,
}

impl RandomPolicy {
    /// Creates a new Random policy instance for a cache of `ways` ways.
    pub fn new(ways: usize) -> Self {
        Self {
            ways: ways.max(1),
            state: SEED,
        }
    }
}

impl ReplacementPolicy for RandomPolicy {
    fn touch(&mut self, _set: usize, _way: usize) {}

    fn victim(&mut self, _set: usize) -> usize {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x % self.ways as u64) as usize
    }
}
