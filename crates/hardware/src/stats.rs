//! Cache statistics collection and reporting.
//!
//! This module tracks per-cache performance counters. It provides:
//! 1. **Processor traffic:** Reads, writes, hits and misses seen by an L1.
//! 2. **Coherence traffic:** Requests handled by an L2 and messages sent per verb.
//! 3. **Stalls:** Counts per stall reason, replays, the deepest stall buffer and the
//!    longest wait.
//! 4. **Occupancy:** Per-cycle samples of tag store and MSHR usage.
//! 5. **Memory traffic:** Line fills and write-backs issued by an L2.

use crate::cache::stall::StallReason;
use crate::coherence::message::CohVerb;

/// Counters for one cache.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    /// Processor loads received (L1).
    pub processor_reads: u64,
    /// Processor stores received (L1).
    pub processor_writes: u64,
    /// Accesses completed without a transaction.
    pub hits: u64,
    /// Accesses that opened a transaction.
    pub misses: u64,
    /// Coherence requests received (L2).
    pub requests: u64,
    /// Victims evicted to make room.
    pub evictions: u64,
    /// Line fills requested from memory (L2).
    pub mem_loads: u64,
    /// Dirty lines written back to memory (L2).
    pub mem_stores: u64,
    /// Stale messages dropped.
    pub stale_drops: u64,
    /// Stalled requests re-dispatched after a wake.
    pub replays: u64,
    /// Deepest stall buffer observed.
    pub max_stall_depth: usize,
    /// Longest wait, in cycles, of a request between first stalling and its replay.
    pub max_stall_age: u64,
    /// Cycles sampled for occupancy.
    pub cycles: u64,
    /// Sum of valid tag-store slots over sampled cycles.
    pub tag_occupancy_sum: u64,
    /// Sum of MSHR entries in use over sampled cycles.
    pub mshr_occupancy_sum: u64,
    /// Sampled cycles with an empty MSHR.
    pub mshr_empty_cycles: u64,
    stalls: [u64; 4],
    sent: [u64; CohVerb::COUNT],
}

impl CacheStats {
    /// Records a request parked with `reason`.
    pub fn record_stall(&mut self, reason: StallReason, depth: usize) {
        self.stalls[reason.index()] += 1;
        self.max_stall_depth = self.max_stall_depth.max(depth);
    }

    /// Records a replay of a request that first stalled `age` cycles ago.
    pub fn record_replay(&mut self, age: u64) {
        self.replays += 1;
        self.max_stall_age = self.max_stall_age.max(age);
    }

    /// Number of stalls recorded for `reason`.
    pub const fn stalls(&self, reason: StallReason) -> u64 {
        self.stalls[reason.index()]
    }

    /// Total stalls over every reason.
    pub fn total_stalls(&self) -> u64 {
        self.stalls.iter().sum()
    }

    /// Records an outgoing coherence message.
    pub fn record_sent(&mut self, verb: CohVerb) {
        self.sent[verb.index()] += 1;
    }

    /// Number of messages sent with `verb`.
    pub const fn sent(&self, verb: CohVerb) -> u64 {
        self.sent[verb.index()]
    }

    /// Records one cycle of occupancy.
    pub fn sample(&mut self, tag_occupancy: usize, mshr_occupancy: usize) {
        self.cycles += 1;
        self.tag_occupancy_sum += tag_occupancy as u64;
        self.mshr_occupancy_sum += mshr_occupancy as u64;
        if mshr_occupancy == 0 {
            self.mshr_empty_cycles += 1;
        }
    }

    /// Hit ratio of processor accesses, 0 when there were none.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }

    fn average(sum: u64, cycles: u64) -> f64 {
        if cycles == 0 { 0.0 } else { sum as f64 / cycles as f64 }
    }

    /// Prints the report for one cache.
    ///
    /// # Arguments
    ///
    /// * `name` - Heading, e.g. `"L1[0] (n0)"`.
    pub fn print(&self, name: &str) {
        println!("----------------------------------------------------------");
        println!("{name}");
        if self.processor_reads + self.processor_writes > 0 {
            println!("  proc.reads             {}", self.processor_reads);
            println!("  proc.writes            {}", self.processor_writes);
            println!("  hits                   {}", self.hits);
            println!("  misses                 {}", self.misses);
            println!("  hit_rate               {:.2}%", self.hit_rate() * 100.0);
        }
        if self.requests > 0 {
            println!("  coh.requests           {}", self.requests);
            println!("  mem.loads              {}", self.mem_loads);
            println!("  mem.stores             {}", self.mem_stores);
        }
        println!("  evictions              {}", self.evictions);
        println!("  stale_drops            {}", self.stale_drops);
        for reason in StallReason::ALL {
            println!("  stall.{:<17}{}", reason.name(), self.stalls(reason));
        }
        println!("  stall.replays          {}", self.replays);
        println!("  stall.max_depth        {}", self.max_stall_depth);
        println!("  stall.max_age          {}", self.max_stall_age);
        println!(
            "  occupancy.tags         {:.2}",
            Self::average(self.tag_occupancy_sum, self.cycles)
        );
        println!(
            "  occupancy.mshr         {:.2}",
            Self::average(self.mshr_occupancy_sum, self.cycles)
        );
        println!("  mshr.empty_cycles      {}", self.mshr_empty_cycles);
        for verb in CohVerb::ALL {
            let count = self.sent(verb);
            if count > 0 {
                println!("  sent.{:<18}{}", verb.name(), count);
            }
        }
    }
}
