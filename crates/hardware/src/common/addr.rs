//! Physical address and node identifier types.
//!
//! This module defines strong types so that line addresses and node ids cannot be
//! mixed with plain integers. It provides the following:
//! 1. **Type Safety:** `PhysAddr` for byte/line addresses, `NodeId` for network endpoints.
//! 2. **Address Manipulation:** Line alignment and offset extraction helpers.
//! 3. **Display:** Hex formatting for addresses so log fields read naturally.

use std::fmt;

/// A physical address.
///
/// Coherence messages always carry line-aligned addresses; processor requests may
/// carry any byte address and are aligned by the tag store on entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    /// Creates a new physical address from a raw 64-bit value.
    ///
    /// # Arguments
    ///
    /// * `addr` - The raw 64-bit address value.
    ///
    /// # Returns
    ///
    /// A new `PhysAddr` instance wrapping the provided address.
    #[inline(always)]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit address value.
    #[inline(always)]
    pub const fn val(&self) -> u64 {
        self.0
    }

    /// Clears the offset bits selected by `offset_mask`.
    ///
    /// # Arguments
    ///
    /// * `offset_mask` - Mask of the byte-offset bits within a line (`line_bytes - 1`).
    ///
    /// # Returns
    ///
    /// The address of the first byte of the containing line.
    #[inline(always)]
    pub const fn align_down(&self, offset_mask: u64) -> Self {
        Self(self.0 & !offset_mask)
    }

    /// Extracts the byte offset within a line.
    #[inline(always)]
    pub const fn offset(&self, offset_mask: u64) -> u64 {
        self.0 & offset_mask
    }
}

impl From<u64> for PhysAddr {
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Identity of a network endpoint (an L1, an L2 or a memory controller).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Returns the raw index.
    #[inline(always)]
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}
