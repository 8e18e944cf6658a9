//! Forwarding and announce engine.
//!
//! Every received packet gets exactly one decision: deliver locally, forward
//! toward the destination, or drop. Announces additionally teach the route
//! table and are relayed through each interface's announce queue, subject to
//! the interface mode.

use bytes::Bytes;
use mesh_wire::{Address, Packet, PacketHeader, PublicIdentity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::announce::{AnnounceQueue, PushOutcome, DEFAULT_ANNOUNCE_QUEUE};
use crate::dedup::{SeenCache, DEFAULT_SEEN_CAPACITY, DEFAULT_SEEN_WINDOW};
use crate::mode::InterfaceMode;
use crate::next_hop::{InterfaceId, LinkPeer, NextHop};
use crate::router::{DropReason, RouterStats, RoutingDecision};
use crate::table::{ReplacementPolicy, Route, RouteTable, RouteUpdate, DEFAULT_ROUTE_CAPACITY};

/// Default hop limit for announces
pub const DEFAULT_MAX_HOPS: u8 = 128;

/// Static description of an interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Identifier used in routes
    pub id: InterfaceId,
    /// Human-readable name
    pub name: String,
    /// Operating mode
    #[serde(default)]
    pub mode: InterfaceMode,
    /// Raw link bandwidth
    #[serde(default = "default_bandwidth")]
    pub bandwidth_bps: u64,
    /// Broadcast medium where the arrival interface is also the only egress
    #[serde(default)]
    pub shared_medium: bool,
}

fn default_bandwidth() -> u64 {
    1200
}

impl InterfaceConfig {
    /// Interface with default bandwidth on a point-to-point medium
    pub fn new(id: u8, name: impl Into<String>, mode: InterfaceMode) -> Self {
        Self {
            id: InterfaceId(id),
            name: name.into(),
            mode,
            bandwidth_bps: default_bandwidth(),
            shared_medium: false,
        }
    }

    /// Set bandwidth
    pub fn with_bandwidth(mut self, bandwidth_bps: u64) -> Self {
        self.bandwidth_bps = bandwidth_bps;
        self
    }

    /// Mark as a shared broadcast medium
    pub fn shared(mut self) -> Self {
        self.shared_medium = true;
        self
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Announces that would exceed this hop count are neither learned nor relayed
    pub max_hops: u8,
    /// Route table capacity
    pub route_capacity: usize,
    /// Route replacement rule
    pub replacement_policy: ReplacementPolicy,
    /// Duplicate-suppression capacity
    pub seen_capacity: usize,
    /// Duplicate-suppression window
    pub seen_window: Duration,
    /// Announce queue depth per interface
    pub announce_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
            route_capacity: DEFAULT_ROUTE_CAPACITY,
            replacement_policy: ReplacementPolicy::default(),
            seen_capacity: DEFAULT_SEEN_CAPACITY,
            seen_window: DEFAULT_SEEN_WINDOW,
            announce_queue_capacity: DEFAULT_ANNOUNCE_QUEUE,
        }
    }
}

/// Where a packet came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrival {
    /// Receiving interface
    pub interface: InterfaceId,
    /// Neighbour that transmitted it, if the link can tell
    pub peer: LinkPeer,
    /// Signal strength reported by the link
    pub rssi: Option<i16>,
}

impl Arrival {
    /// Arrival without signal information
    pub fn new(interface: InterfaceId, peer: LinkPeer) -> Self {
        Self {
            interface,
            peer,
            rssi: None,
        }
    }
}

/// Result of accepting an announce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceOutcome {
    /// Keys carried by the announce
    pub identity: PublicIdentity,
    /// Effect on the route table
    pub update: RouteUpdate,
    /// Hops from here to the announcer
    pub hop_count: u8,
    /// Whether this was the first copy within the suppression window
    pub first_copy: bool,
    /// Interfaces the relay was queued on
    pub relayed_on: usize,
}

#[derive(Debug)]
struct InterfaceState {
    config: InterfaceConfig,
    queue: AnnounceQueue,
    online: bool,
    next_announce: Option<Instant>,
}

/// Per-node forwarding state
#[derive(Debug)]
pub struct ForwardingEngine {
    local: Address,
    routes: RouteTable,
    interfaces: BTreeMap<InterfaceId, InterfaceState>,
    seen: SeenCache,
    stats: RouterStats,
    max_hops: u8,
    queue_capacity: usize,
}

impl ForwardingEngine {
    /// Create an engine for the node at `local`
    pub fn new(local: Address, config: &EngineConfig) -> Self {
        info!(address = %local, max_hops = config.max_hops, "forwarding engine created");
        Self {
            local,
            routes: RouteTable::new(config.route_capacity, config.replacement_policy),
            interfaces: BTreeMap::new(),
            seen: SeenCache::new(config.seen_capacity, config.seen_window),
            stats: RouterStats::new(local.to_string()),
            max_hops: config.max_hops,
            queue_capacity: config.announce_queue_capacity,
        }
    }

    /// Local address
    pub fn local_address(&self) -> Address {
        self.local
    }

    /// Register an interface; it starts online and due for an announce
    pub fn add_interface(&mut self, config: InterfaceConfig, now: Instant) {
        let policy = config.mode.policy();
        let queue = AnnounceQueue::new(
            config.bandwidth_bps,
            policy.announce_budget,
            self.queue_capacity,
            now,
        );
        info!(
            interface = %config.id,
            name = %config.name,
            mode = %config.mode,
            bandwidth_bps = config.bandwidth_bps,
            shared = config.shared_medium,
            "interface added"
        );
        let next_announce = policy.announce_interval.map(|_| now);
        self.interfaces.insert(
            config.id,
            InterfaceState {
                config,
                queue,
                online: true,
                next_announce,
            },
        );
    }

    /// Bring an interface up or down. Routes through a downed interface are dropped.
    pub fn set_online(&mut self, id: InterfaceId, online: bool) -> bool {
        let Some(state) = self.interfaces.get_mut(&id) else {
            return false;
        };
        if state.online != online {
            state.online = online;
            if online {
                info!(interface = %id, "interface up");
            } else {
                let purged = self.routes.purge_interface(id);
                warn!(interface = %id, purged, "interface down");
            }
        }
        true
    }

    /// Configuration of an interface
    pub fn interface(&self, id: InterfaceId) -> Option<&InterfaceConfig> {
        self.interfaces.get(&id).map(|s| &s.config)
    }

    /// All configured interfaces
    pub fn interfaces(&self) -> impl Iterator<Item = &InterfaceConfig> {
        self.interfaces.values().map(|s| &s.config)
    }

    /// Whether an interface is registered and up
    pub fn is_online(&self, id: InterfaceId) -> bool {
        self.interfaces.get(&id).is_some_and(|s| s.online)
    }

    /// Decide what to do with a received non-announce packet
    pub fn decide(
        &mut self,
        header: &PacketHeader,
        arrival: &Arrival,
        now: Instant,
    ) -> RoutingDecision {
        self.stats.decisions_made += 1;
        let decision = self.evaluate(header, arrival, now);
        match &decision {
            RoutingDecision::DeliverLocal => self.stats.packets_local += 1,
            RoutingDecision::Forward(hop) => {
                self.stats.packets_forwarded += 1;
                self.routes.touch(&header.destination);
                debug!(dest = %header.destination.short(), via = %hop, ttl = header.ttl, "forward");
            }
            RoutingDecision::Drop(reason) => {
                self.stats.record_drop(*reason);
                debug!(dest = %header.destination.short(), %reason, "drop");
            }
        }
        decision
    }

    fn evaluate(
        &mut self,
        header: &PacketHeader,
        arrival: &Arrival,
        now: Instant,
    ) -> RoutingDecision {
        if !self.seen.first_sighting(header, now) {
            return RoutingDecision::Drop(DropReason::Duplicate);
        }
        if header.destination == self.local {
            return RoutingDecision::DeliverLocal;
        }
        if header.ttl == 0 {
            return RoutingDecision::Drop(DropReason::TtlExhausted);
        }

        let Some(route) = self.routes.lookup(&header.destination, now) else {
            return RoutingDecision::Drop(DropReason::NoRoute);
        };
        let Some(egress) = self.interfaces.get(&route.interface()).filter(|s| s.online) else {
            return RoutingDecision::Drop(DropReason::NoRoute);
        };

        if route.interface() == arrival.interface {
            if !egress.config.shared_medium {
                return RoutingDecision::Drop(DropReason::RoutingLoop);
            }
            let peer = &route.next_hop.peer;
            if !peer.is_anonymous() && *peer == arrival.peer {
                return RoutingDecision::Drop(DropReason::RoutingLoop);
            }
        }
        RoutingDecision::Forward(route.next_hop.clone())
    }

    /// Next hop for a locally originated packet
    pub fn next_hop_for(&mut self, destination: &Address, now: Instant) -> Option<NextHop> {
        let hop = self
            .routes
            .lookup(destination, now)
            .filter(|route| self.is_online(route.interface()))
            .map(|route| route.next_hop.clone())?;
        self.routes.touch(destination);
        Some(hop)
    }

    /// Remember a locally originated packet so its echoes are suppressed
    pub fn note_originated(&mut self, header: &PacketHeader, now: Instant) {
        self.seen.first_sighting(header, now);
    }

    /// Learn from an announce whose signature (if any) has been checked, and
    /// queue its relay.
    pub fn handle_announce(
        &mut self,
        packet: &Packet,
        arrival: &Arrival,
        now: Instant,
    ) -> Result<AnnounceOutcome, DropReason> {
        self.stats.announces_received += 1;
        let result = self.accept_announce(packet, arrival, now);
        if let Err(reason) = result {
            self.stats.record_drop(reason);
            debug!(dest = %packet.header.destination.short(), %reason, "announce dropped");
        }
        result
    }

    fn accept_announce(
        &mut self,
        packet: &Packet,
        arrival: &Arrival,
        now: Instant,
    ) -> Result<AnnounceOutcome, DropReason> {
        let header = &packet.header;
        if header.destination == self.local {
            return Err(DropReason::OwnAnnounce);
        }
        let identity =
            PublicIdentity::from_bytes(&packet.payload).map_err(|_| DropReason::InvalidAnnounce)?;
        if identity.address() != header.destination {
            return Err(DropReason::InvalidAnnounce);
        }

        let hop_count = header.hop_count.saturating_add(1);
        let first_copy = self.seen.first_sighting(header, now);

        let expiry = self
            .interfaces
            .get(&arrival.interface)
            .map(|s| s.config.mode)
            .unwrap_or_default()
            .policy()
            .route_expiry;
        let update = self.routes.learn(
            header.destination,
            NextHop::new(arrival.interface, arrival.peer.clone()),
            hop_count,
            expiry,
            now,
        );

        let relayed_on = if first_copy {
            self.relay_announce(packet, arrival)
        } else {
            0
        };

        Ok(AnnounceOutcome {
            identity,
            update,
            hop_count,
            first_copy,
            relayed_on,
        })
    }

    fn relay_announce(&mut self, packet: &Packet, arrival: &Arrival) -> usize {
        if packet.header.ttl == 0 {
            debug!(dest = %packet.header.destination.short(), "announce ttl exhausted, not relayed");
            return 0;
        }
        let relayed = packet.forwarded();
        let hop_count = relayed.header.hop_count;
        if hop_count > self.max_hops {
            self.stats.record_drop(DropReason::HopLimit);
            debug!(dest = %packet.header.destination.short(), hop_count, "announce at hop limit, not relayed");
            return 0;
        }
        let bytes = relayed.encode();
        let destination = relayed.header.destination;

        let mut queued = 0;
        for (id, state) in self.interfaces.iter_mut() {
            if !state.online {
                continue;
            }
            if *id == arrival.interface && !state.config.shared_medium {
                continue;
            }
            if !state.config.mode.policy().relays_announce(hop_count) {
                self.stats.announces_filtered += 1;
                continue;
            }
            match state.queue.push(destination, hop_count, bytes.clone()) {
                PushOutcome::Queued | PushOutcome::Superseded => queued += 1,
                PushOutcome::Displaced => {
                    self.stats.announces_overflowed += 1;
                    queued += 1;
                }
                PushOutcome::Rejected => self.stats.announces_overflowed += 1,
            }
        }
        self.stats.announces_queued += queued as u64;
        queued
    }

    /// Interfaces whose periodic announce is due; their timers are re-armed
    pub fn due_announces(&mut self, now: Instant) -> Vec<InterfaceId> {
        let mut due = Vec::new();
        for (id, state) in self.interfaces.iter_mut() {
            let Some(interval) = state.config.mode.policy().announce_interval else {
                continue;
            };
            if !state.online {
                continue;
            }
            if state.next_announce.map_or(true, |at| at <= now) {
                state.next_announce = Some(now + interval);
                due.push(*id);
            }
        }
        due
    }

    /// Queue our own announce on `targets` (all online interfaces if empty).
    ///
    /// Interfaces without an announce budget take it immediately; those
    /// transmissions are returned.
    pub fn queue_local_announce(
        &mut self,
        packet: &Packet,
        targets: &[InterfaceId],
        now: Instant,
    ) -> Vec<(InterfaceId, Bytes)> {
        self.seen.first_sighting(&packet.header, now);
        let bytes = packet.encode();
        let mut immediate = Vec::new();
        for (id, state) in self.interfaces.iter_mut() {
            if !state.online || (!targets.is_empty() && !targets.contains(id)) {
                continue;
            }
            match state
                .queue
                .push(packet.header.destination, packet.header.hop_count, bytes.clone())
            {
                PushOutcome::Rejected if state.queue.rate_bps() <= 0.0 => {
                    immediate.push((*id, bytes.clone()));
                }
                PushOutcome::Rejected => self.stats.announces_overflowed += 1,
                _ => self.stats.announces_queued += 1,
            }
        }
        self.stats.announces_sent += immediate.len() as u64;
        immediate
    }

    /// Release queued announces the budgets allow
    pub fn poll_announces(&mut self, now: Instant) -> Vec<(InterfaceId, Bytes)> {
        let mut out = Vec::new();
        for (id, state) in self.interfaces.iter_mut() {
            if !state.online {
                continue;
            }
            out.extend(state.queue.poll(now).into_iter().map(|b| (*id, b)));
        }
        self.stats.announces_sent += out.len() as u64;
        out
    }

    /// Expire routes and suppression entries
    pub fn sweep(&mut self, now: Instant) -> Vec<Route> {
        self.seen.prune(now);
        self.routes.sweep(now)
    }

    /// Route table
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Mutable route table
    pub fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.routes
    }

    /// Statistics snapshot
    pub fn stats(&self) -> RouterStats {
        let mut stats = self.stats.clone();
        stats.total_routes = self.routes.len();
        stats
    }
}
