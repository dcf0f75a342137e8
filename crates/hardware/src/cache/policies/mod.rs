//! Replacement policies for the tag store.
//!
//! A policy only ranks the ways of a set; the tag store prefers an invalid way
//! before consulting it, and the cache decides whether the chosen victim may be
//! evicted right now (a victim that is mid-transaction is never disturbed).
//!
//! # Policies
//!
//! - `Lru`: Least Recently Used (default).
//! - `Fifo`: First-In, First-Out.
//! - `Random`: Deterministic pseudo-random selection.

/// First-In, First-Out replacement policy.
pub mod fifo;

/// Least Recently Used replacement policy.
pub mod lru;

/// Random replacement policy.
pub mod random;

use std::fmt;

pub use fifo::FifoPolicy;
pub use lru::LruPolicy;
pub use random::RandomPolicy;

use crate::config::ReplacementPolicy as PolicyKind;

/// Victim ranking for one set-associative structure.
pub trait ReplacementPolicy: fmt::Debug {
    /// Records an access (hit, fill or transaction completion) to `way` of `set`.
    fn touch(&mut self, set: usize, way: usize);

    /// Records that `way` of `set` no longer holds a line.
    ///
    /// The default does nothing; rank-based policies move the way to the eviction end.
    fn release(&mut self, _set: usize, _way: usize) {}

    /// Selects the way of `set` to evict next.
    fn victim(&mut self, set: usize) -> usize;
}

/// Builds the policy selected in the configuration.
///
/// # Arguments
///
/// * `kind` - Policy selected in `CacheConfig::policy`.
/// * `sets` - Number of sets.
/// * `ways` - Associativity.
pub fn build(kind: PolicyKind, sets: usize, ways: usize) -> Box<dyn ReplacementPolicy> {
    match kind {
        PolicyKind::Lru => Box::new(LruPolicy::new(sets, ways)),
        PolicyKind::Fifo => Box::new(FifoPolicy::new(sets, ways)),
        PolicyKind::Random => Box::new(RandomPolicy::new(ways)),
    }
}
