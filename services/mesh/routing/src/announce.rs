//! Per-interface announce queue with a bandwidth budget.
//!
//! Announces are released through a token bucket refilled at
//! `bandwidth × budget` bits per second. Waiting announces are ordered by hop
//! count (nearest first, so local announces lead) and then by arrival. When the
//! queue is full the most distant announce is discarded.

use bytes::Bytes;
use mesh_wire::Address;
use std::time::Instant;
use tracing::debug;

/// Default number of announces held per interface
pub const DEFAULT_ANNOUNCE_QUEUE: usize = 32;

/// Bucket depth in seconds of budgeted bandwidth
const BURST_SECONDS: f64 = 10.0;

/// The bucket always holds at least this many bits so a signed announce fits
const MIN_BURST_BITS: f64 = 2.0 * 8.0 * 160.0;

#[derive(Debug, Clone)]
struct QueuedAnnounce {
    destination: Address,
    hop_count: u8,
    seq: u64,
    bytes: Bytes,
}

impl QueuedAnnounce {
    fn bits(&self) -> f64 {
        self.bytes.len() as f64 * 8.0
    }

    fn rank(&self) -> (u8, u64) {
        (self.hop_count, self.seq)
    }
}

/// Result of [`AnnounceQueue::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Added to the queue
    Queued,
    /// Replaced a waiting announce for the same destination
    Superseded,
    /// Queued after discarding a more distant announce
    Displaced,
    /// Not queued (queue full of nearer announces, or no budget)
    Rejected,
}

/// Bandwidth-limited, hop-prioritized announce queue
#[derive(Debug)]
pub struct AnnounceQueue {
    entries: Vec<QueuedAnnounce>,
    capacity: usize,
    rate_bps: f64,
    burst_bits: f64,
    tokens: f64,
    last_refill: Instant,
    next_seq: u64,
}

impl AnnounceQueue {
    /// Queue for an interface of `bandwidth_bps` allowed to spend `budget` of it
    pub fn new(bandwidth_bps: u64, budget: f64, capacity: usize, now: Instant) -> Self {
        let rate_bps = bandwidth_bps as f64 * budget.clamp(0.0, 1.0);
        let burst_bits = if rate_bps > 0.0 {
            (rate_bps * BURST_SECONDS).max(MIN_BURST_BITS)
        } else {
            0.0
        };
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            rate_bps,
            burst_bits,
            tokens: burst_bits,
            last_refill: now,
            next_seq: 0,
        }
    }

    /// Bits per second available to announces
    pub fn rate_bps(&self) -> f64 {
        self.rate_bps
    }

    /// Waiting announces
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offer an encoded announce for `destination` travelling `hop_count` hops
    pub fn push(&mut self, destination: Address, hop_count: u8, bytes: Bytes) -> PushOutcome {
        if self.rate_bps <= 0.0 {
            return PushOutcome::Rejected;
        }

        let entry = QueuedAnnounce {
            destination,
            hop_count,
            seq: self.next_seq,
            bytes,
        };
        self.next_seq += 1;

        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.destination == destination)
        {
            if hop_count <= self.entries[pos].hop_count {
                self.entries[pos] = entry;
                return PushOutcome::Superseded;
            }
            return PushOutcome::Rejected;
        }

        if self.entries.len() < self.capacity {
            self.entries.push(entry);
            return PushOutcome::Queued;
        }

        let worst = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| e.rank())
            .map(|(i, e)| (i, e.hop_count));
        match worst {
            Some((i, worst_hops)) if hop_count < worst_hops => {
                debug!(dropped_hops = worst_hops, hop_count, "announce queue full, displacing");
                self.entries[i] = entry;
                PushOutcome::Displaced
            }
            _ => PushOutcome::Rejected,
        }
    }

    /// Release whatever the budget allows at `now`
    pub fn poll(&mut self, now: Instant) -> Vec<Bytes> {
        self.refill(now);
        let mut out = Vec::new();
        loop {
            let next = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.rank())
                .map(|(i, e)| (i, e.bits()));
            match next {
                Some((i, bits)) if bits <= self.tokens => {
                    self.tokens -= bits;
                    out.push(self.entries.swap_remove(i).bytes);
                }
                _ => break,
            }
        }
        out
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_bps).min(self.burst_bits);
        self.last_refill = now;
    }
}
