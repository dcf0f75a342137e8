//! Credit-controlled output port.
//!
//! Every cache owns one `PortAdapter` for its link into the network. Messages produced
//! while handling an event are queued with a release cycle (`now + lookup_latency`) and
//! leave in FIFO order once released, one credit each. A cache with no credits keeps
//! its packets queued; nothing is dropped. Packets to another unit of the same node use
//! the local port and take no credit.

use std::collections::VecDeque;

use super::packet::NetworkPacket;

#[derive(Clone, Copy, Debug)]
struct Queued {
    release_at: u64,
    packet: NetworkPacket,
}

/// Output buffer and credit counter for one outgoing link.
#[derive(Debug)]
pub struct PortAdapter {
    credits: u32,
    max_credits: u32,
    output: VecDeque<Queued>,
    blocked_cycles: u64,
    sent: u64,
    local: u64,
}

impl PortAdapter {
    /// Creates a port with `credits` slots available downstream.
    pub fn new(credits: u32) -> Self {
        Self {
            credits,
            max_credits: credits,
            output: VecDeque::new(),
            blocked_cycles: 0,
            sent: 0,
            local: 0,
        }
    }

    /// Queues `packet` for release at cycle `release_at`.
    pub fn enqueue(&mut self, packet: NetworkPacket, release_at: u64) {
        debug_assert!(
            self.output.back().is_none_or(|q| q.release_at <= release_at),
            "release cycles must be monotonic"
        );
        self.output.push_back(Queued { release_at, packet });
    }

    /// Removes every packet that may leave at cycle `now`.
    ///
    /// Stops at the first packet not yet released or when credits run out; a stop on
    /// credits with released packets waiting counts as a blocked cycle.
    pub fn drain_ready(&mut self, now: u64) -> Vec<NetworkPacket> {
        let mut ready = Vec::new();
        while let Some(front) = self.output.front() {
            if front.release_at > now {
                break;
            }
            let local = front.packet.is_local();
            if !local && self.credits == 0 {
                self.blocked_cycles += 1;
                break;
            }
            if let Some(queued) = self.output.pop_front() {
                if local {
                    self.local += 1;
                } else {
                    self.credits -= 1;
                }
                self.sent += 1;
                ready.push(queued.packet);
            }
        }
        ready
    }

    /// Accepts one returned credit.
    pub fn add_credit(&mut self) {
        debug_assert!(self.credits < self.max_credits, "credit returned twice");
        self.credits = (self.credits + 1).min(self.max_credits);
    }

    /// Credits currently available.
    pub const fn credits(&self) -> u32 {
        self.credits
    }

    /// Packets waiting in the output buffer.
    pub fn pending(&self) -> usize {
        self.output.len()
    }

    /// Whether nothing is queued and every credit has come back.
    pub fn is_idle(&self) -> bool {
        self.output.is_empty() && self.credits == self.max_credits
    }

    /// Cycles on which released packets waited for credit.
    pub const fn blocked_cycles(&self) -> u64 {
        self.blocked_cycles
    }

    /// Packets sent so far, local ones included.
    pub const fn sent(&self) -> u64 {
        self.sent
    }

    /// Packets sent over the local port.
    pub const fn local_sent(&self) -> u64 {
        self.local
    }
}
