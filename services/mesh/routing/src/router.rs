//! Routing decisions, drop reasons and router statistics

use crate::next_hop::NextHop;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Routing decision result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Deliver locally (we are the destination)
    DeliverLocal,
    /// Forward to next hop with ttl decremented and hop count incremented
    Forward(NextHop),
    /// Drop packet
    Drop(DropReason),
}

/// Reason for dropping a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// No live route to destination
    NoRoute,
    /// TTL reached zero
    TtlExhausted,
    /// Only route leads back where the packet came from
    RoutingLoop,
    /// Copy of a packet already handled
    Duplicate,
    /// Our own announce heard back
    OwnAnnounce,
    /// Announce payload or address is inconsistent
    InvalidAnnounce,
    /// Signature did not verify
    BadSignature,
    /// Announce would exceed the hop limit
    HopLimit,
}

impl DropReason {
    /// Stable label for counters
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::NoRoute => "no_route",
            DropReason::TtlExhausted => "ttl_exhausted",
            DropReason::RoutingLoop => "routing_loop",
            DropReason::Duplicate => "duplicate",
            DropReason::OwnAnnounce => "own_announce",
            DropReason::InvalidAnnounce => "invalid_announce",
            DropReason::BadSignature => "bad_signature",
            DropReason::HopLimit => "hop_limit",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NoRoute => write!(f, "no route to destination"),
            DropReason::TtlExhausted => write!(f, "TTL exhausted"),
            DropReason::RoutingLoop => write!(f, "routing loop detected"),
            DropReason::Duplicate => write!(f, "duplicate packet"),
            DropReason::OwnAnnounce => write!(f, "own announce"),
            DropReason::InvalidAnnounce => write!(f, "invalid announce"),
            DropReason::BadSignature => write!(f, "bad signature"),
            DropReason::HopLimit => write!(f, "hop limit exceeded"),
        }
    }
}

/// Router statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterStats {
    /// Local address (hex)
    pub local_address: String,
    /// Total number of routes
    pub total_routes: usize,
    /// Number of routing decisions made
    pub decisions_made: u64,
    /// Number of packets forwarded
    pub packets_forwarded: u64,
    /// Number of packets delivered locally
    pub packets_local: u64,
    /// Number of packets dropped
    pub packets_dropped: u64,
    /// Breakdown of drop reasons
    pub drop_reasons: HashMap<String, u64>,
    /// Announces received from neighbours
    pub announces_received: u64,
    /// Announces placed on an interface queue
    pub announces_queued: u64,
    /// Announces handed to interfaces
    pub announces_sent: u64,
    /// Relays suppressed by interface mode policy
    pub announces_filtered: u64,
    /// Announces pushed out of a full queue
    pub announces_overflowed: u64,
}

impl RouterStats {
    /// Create new router statistics
    pub fn new(local_address: String) -> Self {
        Self {
            local_address,
            ..Default::default()
        }
    }

    /// Count a drop
    pub fn record_drop(&mut self, reason: DropReason) {
        self.packets_dropped += 1;
        *self
            .drop_reasons
            .entry(reason.label().to_string())
            .or_insert(0) += 1;
    }

    /// Drops recorded for `reason`
    pub fn drops(&self, reason: DropReason) -> u64 {
        self.drop_reasons.get(reason.label()).copied().unwrap_or(0)
    }
}
