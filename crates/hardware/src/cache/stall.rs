//! Stall buffer.
//!
//! Requests that cannot make progress are parked here with the reason they stalled and
//! the condition that has to change before a retry can succeed. A wake event removes
//! exactly the entries waiting on it and hands them back in arrival order; the cache
//! then re-dispatches them through its normal request path, where they may stall again.
//! A request that stalls again is requeued under its original sequence number and keeps
//! its place ahead of requests that arrived after it.
//!
//! Entries for the same line always share one wait key, so a later request for a line
//! can never overtake an earlier one.

use std::collections::{BTreeMap, HashMap};

use crate::common::PhysAddr;

/// Why a request could not proceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StallReason {
    /// No free MSHR entry.
    Mshr,
    /// The line already has a transaction in flight, or an earlier request for it is stalled.
    PrevPend,
    /// The replacement victim is itself mid-transaction.
    LruBusy,
    /// The target line is being evicted.
    Trans,
}

impl StallReason {
    /// Every reason, in reporting order.
    pub const ALL: [Self; 4] = [Self::Mshr, Self::PrevPend, Self::LruBusy, Self::Trans];

    /// Dense index for per-reason counters.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Report name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mshr => "MSHR_STALL",
            Self::PrevPend => "PREV_PEND_STALL",
            Self::LruBusy => "LRU_BUSY_STALL",
            Self::Trans => "TRANS_STALL",
        }
    }
}

/// Condition a stalled request is waiting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WaitKey {
    /// Any MSHR entry being released.
    AnyMshr,
    /// The named line's transaction or eviction settling.
    Line(PhysAddr),
}

/// Event that may release stalled requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    /// An MSHR entry was released.
    MshrReleased,
    /// The named line returned to a stable state with nothing in flight.
    LineSettled(PhysAddr),
}

impl Wake {
    /// Wait key this event satisfies.
    pub const fn key(self) -> WaitKey {
        match self {
            Self::MshrReleased => WaitKey::AnyMshr,
            Self::LineSettled(addr) => WaitKey::Line(addr),
        }
    }
}

/// One parked request.
#[derive(Clone, Debug)]
pub struct StallEntry<R> {
    /// The request as it will be re-dispatched.
    pub request: R,
    /// Line the request targets.
    pub addr: PhysAddr,
    /// Reason recorded at the time of the stall.
    pub reason: StallReason,
    /// Condition that releases the entry.
    pub key: WaitKey,
    /// Cycle the request first stalled.
    pub stalled_at: u64,
}

/// Arrival-ordered queue of stalled requests, indexed by wait key and line.
#[derive(Debug)]
pub struct StallBuffer<R> {
    entries: BTreeMap<u64, StallEntry<R>>,
    by_key: HashMap<WaitKey, Vec<u64>>,
    by_line: HashMap<PhysAddr, (usize, WaitKey)>,
    next_seq: u64,
    max_depth: usize,
}

impl<R> Default for StallBuffer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> StallBuffer<R> {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            by_key: HashMap::new(),
            by_line: HashMap::new(),
            next_seq: 0,
            max_depth: 0,
        }
    }

    /// Parks a request at the tail of the queue.
    pub fn push(&mut self, entry: StallEntry<R>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.insert(seq, entry);
    }

    /// Parks a replayed request again at the position of its first stall.
    pub fn requeue(&mut self, seq: u64, entry: StallEntry<R>) {
        debug_assert!(seq < self.next_seq, "requeue of a sequence never issued");
        self.insert(seq, entry);
    }

    fn insert(&mut self, seq: u64, entry: StallEntry<R>) {
        let waiting = self.by_key.entry(entry.key).or_default();
        let at = waiting.partition_point(|&s| s < seq);
        waiting.insert(at, seq);
        let line = self.by_line.entry(entry.addr).or_insert((0, entry.key));
        line.0 += 1;
        line.1 = entry.key;
        let _ = self.entries.insert(seq, entry);
        self.max_depth = self.max_depth.max(self.entries.len());
    }

    /// Wait key of the requests already parked for `addr`, if any.
    ///
    /// A new request for the same line must stall on this key to keep arrival order.
    pub fn has_match(&self, addr: PhysAddr) -> Option<WaitKey> {
        self.by_line.get(&addr).map(|&(_, key)| key)
    }

    /// Removes and returns every entry released by `wake` with its sequence number,
    /// oldest first.
    pub fn wake(&mut self, wake: Wake) -> Vec<(u64, StallEntry<R>)> {
        let Some(seqs) = self.by_key.remove(&wake.key()) else {
            return Vec::new();
        };
        let mut woken = Vec::with_capacity(seqs.len());
        for seq in seqs {
            if let Some(entry) = self.entries.remove(&seq) {
                if let Some(line) = self.by_line.get_mut(&entry.addr) {
                    line.0 -= 1;
                    if line.0 == 0 {
                        let _ = self.by_line.remove(&entry.addr);
                    }
                }
                woken.push((seq, entry));
            }
        }
        woken
    }

    /// Iterates over parked entries in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &StallEntry<R>> {
        self.entries.values()
    }

    /// Number of parked requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest number of requests parked at once.
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }
}
