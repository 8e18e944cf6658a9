//! Recently-seen packet suppression.
//!
//! Flooded packets come back from several neighbours. A packet's fingerprint
//! ignores the fields relays rewrite, so every copy maps to the same entry.
//! Entries age out after a short window so that periodic, byte-identical
//! announces and fragment retransmissions are not mistaken for echoes.

use mesh_storage::LruArena;
use mesh_wire::{Address, PacketHeader, PacketType, PAYLOAD_HASH_SIZE};
use std::time::{Duration, Instant};

/// Default number of remembered fingerprints
pub const DEFAULT_SEEN_CAPACITY: usize = 1024;

/// Default suppression window
pub const DEFAULT_SEEN_WINDOW: Duration = Duration::from_secs(5);

/// Relay-invariant identity of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    packet_type: PacketType,
    destination: Address,
    payload_hash: [u8; PAYLOAD_HASH_SIZE],
}

impl From<&PacketHeader> for Fingerprint {
    fn from(header: &PacketHeader) -> Self {
        Self {
            packet_type: header.packet_type,
            destination: header.destination,
            payload_hash: header.payload_hash,
        }
    }
}

/// Bounded, time-windowed set of fingerprints
#[derive(Debug)]
pub struct SeenCache {
    seen: LruArena<Fingerprint, Instant>,
    window: Duration,
}

impl SeenCache {
    /// Create a cache
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            seen: LruArena::new(capacity),
            window,
        }
    }

    /// Record `header`; returns true the first time it is seen within the window
    pub fn first_sighting(&mut self, header: &PacketHeader, now: Instant) -> bool {
        let fp = Fingerprint::from(header);
        if let Some(at) = self.seen.get(&fp) {
            if now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }
        self.seen.insert(fp, now);
        true
    }

    /// Forget entries older than the window
    pub fn prune(&mut self, now: Instant) -> usize {
        let window = self.window;
        self.seen
            .retain(|_, at| now.saturating_duration_since(*at) < window)
            .len()
    }

    /// Remembered fingerprints
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
