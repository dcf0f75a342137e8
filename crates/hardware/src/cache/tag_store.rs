//! Set-associative tag store.
//!
//! This module implements the directory half of a cache: a flat arena of line slots
//! addressed by `SlotId`, grouped into sets, with a pluggable replacement policy. It provides:
//! 1. **Decoding:** Line address, set index and tag extraction for the configured geometry.
//! 2. **Lookup:** Address to slot, or no match.
//! 3. **Reservation:** A free slot in the target set, or the policy's victim for the caller
//!    to evict.
//!
//! The tag store never decides whether a victim may be evicted; the owning cache checks
//! the victim's coherence state first. Line data is not modeled.

use tracing::trace;

use super::policies::{self, ReplacementPolicy};
use crate::common::{PhysAddr, Result};
use crate::config::CacheConfig;

/// Index of a line slot; also indexes the cache's parallel FSM arena.
pub type SlotId = usize;

/// One line slot.
#[derive(Clone, Debug, Default)]
struct Slot {
    tag: u64,
    line: PhysAddr,
    valid: bool,
    dirty: bool,
    have_data: bool,
}

/// Outcome of `TagStore::reserve_block_for`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reservation {
    /// An invalid slot in the target set; install directly.
    Vacant(SlotId),
    /// Every way is occupied; `victim` must be evicted from `slot` first.
    Occupied {
        /// Slot chosen by the replacement policy.
        slot: SlotId,
        /// Line currently resident in that slot.
        victim: PhysAddr,
    },
}

/// Set-associative tag store with a replacement policy.
#[derive(Debug)]
pub struct TagStore {
    slots: Vec<Slot>,
    num_sets: usize,
    ways: usize,
    line_bytes: u64,
    offset_bits: u32,
    set_bits: u32,
    hit_latency: u64,
    lookup_latency: u64,
    policy: Box<dyn ReplacementPolicy>,
    occupied: usize,
}

impl TagStore {
    /// Creates an empty tag store.
    ///
    /// # Arguments
    ///
    /// * `config` - Geometry, latencies and replacement policy.
    ///
    /// # Returns
    ///
    /// The tag store, or `InvalidGeometry` if the configuration cannot be realized.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        config.validate("cache")?;
        let num_sets = config.num_sets();
        Ok(Self {
            slots: vec![Slot::default(); num_sets * config.ways],
            num_sets,
            ways: config.ways,
            line_bytes: config.line_bytes as u64,
            offset_bits: config.line_bytes.trailing_zeros(),
            set_bits: num_sets.trailing_zeros(),
            hit_latency: config.hit_latency,
            lookup_latency: config.lookup_latency,
            policy: policies::build(config.policy, num_sets, config.ways),
            occupied: 0,
        })
    }

    /// Mask of the byte-offset bits within a line.
    pub const fn offset_mask(&self) -> u64 {
        self.line_bytes - 1
    }

    /// Mask of the tag bits (everything above offset and set index).
    pub const fn tag_mask(&self) -> u64 {
        !((1u64 << (self.offset_bits + self.set_bits)) - 1)
    }

    /// Aligns `addr` down to the start of its line.
    pub const fn line_addr(&self, addr: PhysAddr) -> PhysAddr {
        addr.align_down(self.offset_mask())
    }

    const fn set_index(&self, addr: PhysAddr) -> usize {
        ((addr.val() >> self.offset_bits) as usize) & (self.num_sets - 1)
    }

    const fn tag_of(&self, addr: PhysAddr) -> u64 {
        addr.val() >> (self.offset_bits + self.set_bits)
    }

    const fn set_of(&self, slot: SlotId) -> (usize, usize) {
        (slot / self.ways, slot % self.ways)
    }

    /// Finds the slot holding the line that contains `addr`.
    pub fn lookup(&self, addr: PhysAddr) -> Option<SlotId> {
        let set = self.set_index(addr);
        let tag = self.tag_of(addr);
        let base = set * self.ways;
        (base..base + self.ways).find(|&slot| {
            let s = &self.slots[slot];
            s.valid && s.tag == tag
        })
    }

    /// Marks `slot` as most recently used.
    pub fn touch(&mut self, slot: SlotId) {
        let (set, way) = self.set_of(slot);
        self.policy.touch(set, way);
    }

    /// Picks the slot a new line for `addr` should occupy.
    ///
    /// Prefers an invalid way; otherwise returns the policy's victim. Nothing is
    /// modified except the policy's internal state.
    pub fn reserve_block_for(&mut self, addr: PhysAddr) -> Reservation {
        let set = self.set_index(addr);
        let base = set * self.ways;
        if let Some(slot) = (base..base + self.ways).find(|&slot| !self.slots[slot].valid) {
            return Reservation::Vacant(slot);
        }
        let slot = base + self.policy.victim(set);
        Reservation::Occupied {
            slot,
            victim: self.slots[slot].line,
        }
    }

    /// Installs the line containing `addr` into `slot`, clean and without data.
    pub fn install(&mut self, slot: SlotId, addr: PhysAddr) {
        let line = self.line_addr(addr);
        let tag = self.tag_of(line);
        let entry = &mut self.slots[slot];
        debug_assert!(!entry.valid, "install over a resident line");
        *entry = Slot {
            tag,
            line,
            valid: true,
            dirty: false,
            have_data: false,
        };
        self.occupied += 1;
        self.touch(slot);
        trace!(slot, line = %line, "line installed");
    }

    /// Frees `slot`.
    ///
    /// # Returns
    ///
    /// `true` if the line was dirty and must be written back.
    pub fn invalidate(&mut self, slot: SlotId) -> bool {
        let entry = &mut self.slots[slot];
        if !entry.valid {
            return false;
        }
        let dirty = entry.dirty;
        *entry = Slot::default();
        self.occupied -= 1;
        let (set, way) = self.set_of(slot);
        self.policy.release(set, way);
        dirty
    }

    /// Marks the line in `slot` as modified relative to memory.
    pub fn mark_dirty(&mut self, slot: SlotId) {
        self.slots[slot].dirty = true;
    }

    /// Whether the line in `slot` differs from memory.
    pub fn is_dirty(&self, slot: SlotId) -> bool {
        self.slots[slot].dirty
    }

    /// Records that the line's data has arrived from the next level.
    pub fn set_have_data(&mut self, slot: SlotId) {
        self.slots[slot].have_data = true;
    }

    /// Whether the line's data is present.
    pub fn has_data(&self, slot: SlotId) -> bool {
        self.slots[slot].have_data
    }

    /// Line resident in `slot`, if any.
    pub fn line_of(&self, slot: SlotId) -> Option<PhysAddr> {
        let entry = &self.slots[slot];
        entry.valid.then_some(entry.line)
    }

    /// Number of valid slots.
    pub const fn occupancy(&self) -> usize {
        self.occupied
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of sets.
    pub const fn num_sets(&self) -> usize {
        self.num_sets
    }

    /// Associativity.
    pub const fn ways(&self) -> usize {
        self.ways
    }

    /// Cycles from a hit to the processor response.
    pub const fn hit_latency(&self) -> u64 {
        self.hit_latency
    }

    /// Cycles from handling a request to releasing its messages.
    pub const fn lookup_latency(&self) -> u64 {
        self.lookup_latency
    }
}
