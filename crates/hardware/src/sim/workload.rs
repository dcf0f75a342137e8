//! Processor workloads: text traces and synthetic streams.
//!
//! A trace is one access per line, `<l1> <L|S> <address>`, with the address in hex
//! (`0x` prefix optional). Blank lines and `#` comments are skipped:
//!
//! ```text
//! # two cores fight over one line
//! 0 L 0x1000
//! 1 S 0x1008
//! ```

use std::fs;
use std::path::Path;

use crate::coherence::AccessKind;
use crate::common::{CoherenceError, PhysAddr, Result};

/// One processor access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    /// Index of the issuing L1.
    pub l1: usize,
    /// Load or store.
    pub kind: AccessKind,
    /// Byte address.
    pub addr: PhysAddr,
}

/// Parses a trace from text.
///
/// # Returns
///
/// The accesses in file order, or `Trace` naming the first malformed line (1-based).
pub fn parse_trace(text: &str) -> Result<Vec<TraceEntry>> {
    let mut entries = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let bad = |reason: &str| CoherenceError::Trace {
            line: index + 1,
            reason: reason.to_string(),
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [l1, kind, addr] = fields.as_slice() else {
            return Err(bad("expected `<l1> <L|S> <address>`"));
        };
        let l1 = l1.parse::<usize>().map_err(|_| bad("bad L1 index"))?;
        let kind = match *kind {
            "L" | "l" | "R" | "r" => AccessKind::Load,
            "S" | "s" | "W" | "w" => AccessKind::Store,
            _ => return Err(bad("access must be L or S")),
        };
        let digits = addr.trim_start_matches("0x").trim_start_matches("0X");
        let addr = u64::from_str_radix(digits, 16).map_err(|_| bad("bad hex address"))?;
        entries.push(TraceEntry {
            l1,
            kind,
            addr: PhysAddr::new(addr),
        });
    }
    Ok(entries)
}

/// Reads and parses a trace file.
pub fn load_trace(path: impl AsRef<Path>) -> Result<Vec<TraceEntry>> {
    let text = fs::read_to_string(path)?;
    parse_trace(&text)
}

/// Deterministic random access stream over a small working set.
///
/// Lines are drawn from `lines` consecutive cache lines starting at `base`; the small
/// working set keeps sharing, upgrades and forwards frequent.
#[derive(Clone, Debug)]
pub struct SyntheticWorkload {
    state: u64,
    /// Number of L1s to spread accesses over.
    pub num_l1: usize,
    /// First address of the working set.
    pub base: u64,
    /// Number of distinct lines touched.
    pub lines: u64,
    /// Line size in bytes.
    pub line_bytes: u64,
    /// Percentage of accesses that are stores.
    pub store_percent: u64,
}

impl SyntheticWorkload {
    const DEFAULT_SEED: u64 = 0x2545_f491_4f6c_dd1d;

    /// Creates a workload; a zero seed is replaced by a fixed nonzero one.
    pub const fn new(seed: u64, num_l1: usize, lines: u64, line_bytes: u64) -> Self {
        Self {
            state: if seed == 0 { Self::DEFAULT_SEED } else { seed },
            num_l1,
            base: 0x1_0000,
            lines,
            line_bytes,
            store_percent: 30,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Produces the next access.
    pub fn next_entry(&mut self) -> TraceEntry {
        let l1 = (self.next_u64() % self.num_l1.max(1) as u64) as usize;
        let line = self.next_u64() % self.lines.max(1);
        let word = self.next_u64() % (self.line_bytes / 8).max(1);
        let kind = if self.next_u64() % 100 < self.store_percent {
            AccessKind::Store
        } else {
            AccessKind::Load
        };
        TraceEntry {
            l1,
            kind,
            addr: PhysAddr::new(self.base + line * self.line_bytes + word * 8),
        }
    }

    /// Produces `count` accesses.
    pub fn generate(&mut self, count: usize) -> Vec<TraceEntry> {
        (0..count).map(|_| self.next_entry()).collect()
    }
}
