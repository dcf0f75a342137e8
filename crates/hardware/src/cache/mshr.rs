//! Miss Status Holding Registers.
//!
//! A fixed-capacity, fully-associative table of lines with a transaction in flight.
//! An entry for an address exists exactly while that line's transaction is open, which
//! is what enforces at most one outstanding transaction per line per cache.

use super::stall::StallReason;
use super::tag_store::SlotId;
use crate::common::PhysAddr;

/// One in-flight line.
#[derive(Clone, Debug)]
pub struct MshrEntry<P> {
    /// Line address of the transaction.
    pub addr: PhysAddr,
    /// Slot reserved for the line (may still hold a victim being evicted).
    pub slot: SlotId,
    /// Cache-specific descriptor of the request that opened the transaction.
    pub pending: P,
}

/// MSHR table.
#[derive(Debug)]
pub struct Mshr<P> {
    capacity: usize,
    entries: Vec<MshrEntry<P>>,
}

impl<P> Mshr<P> {
    /// Creates an empty table with room for `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Whether a transaction for `addr` is in flight.
    pub fn has_match(&self, addr: PhysAddr) -> bool {
        self.entries.iter().any(|e| e.addr == addr)
    }

    /// Whether a new line could be tracked right now.
    pub fn can_allocate(&self) -> bool {
        self.entries.len() < self.capacity
    }

    /// Opens a transaction for `addr`.
    ///
    /// # Returns
    ///
    /// `Err(StallReason::PrevPend)` if `addr` is already tracked, `Err(StallReason::Mshr)` if
    /// the table is full. The table is unchanged on error.
    pub fn allocate(&mut self, addr: PhysAddr, slot: SlotId, pending: P) -> Result<(), StallReason> {
        if self.has_match(addr) {
            return Err(StallReason::PrevPend);
        }
        if !self.can_allocate() {
            return Err(StallReason::Mshr);
        }
        self.entries.push(MshrEntry { addr, slot, pending });
        Ok(())
    }

    /// Entry for `addr`, if in flight.
    pub fn get(&self, addr: PhysAddr) -> Option<&MshrEntry<P>> {
        self.entries.iter().find(|e| e.addr == addr)
    }

    /// Mutable entry for `addr`, if in flight.
    pub fn get_mut(&mut self, addr: PhysAddr) -> Option<&mut MshrEntry<P>> {
        self.entries.iter_mut().find(|e| e.addr == addr)
    }

    /// Closes the transaction for `addr` and returns its entry.
    pub fn release(&mut self, addr: PhysAddr) -> Option<MshrEntry<P>> {
        let index = self.entries.iter().position(|e| e.addr == addr)?;
        Some(self.entries.swap_remove(index))
    }

    /// Iterates over in-flight entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &MshrEntry<P>> {
        self.entries.iter()
    }

    /// Number of lines in flight.
    pub fn occupancy(&self) -> usize {
        self.entries.len()
    }

    /// Maximum number of lines in flight.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
