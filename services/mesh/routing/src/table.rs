//! Route table learned from announces.
//!
//! One route per destination, held in a fixed-capacity arena. A newer announce
//! only displaces an existing route when it is strictly shorter (or the old one
//! has expired); equal or longer paths merely refresh the route when they come
//! through the same neighbour.

use mesh_storage::LruArena;
use mesh_wire::Address;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::next_hop::{InterfaceId, NextHop};

/// Default number of routes
pub const DEFAULT_ROUTE_CAPACITY: usize = 5000;

/// A route to one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination address
    pub destination: Address,
    /// Neighbour to hand packets to
    pub next_hop: NextHop,
    /// Hops from here to the destination
    pub hop_count: u8,
    /// When this path was adopted
    pub learned: Instant,
    /// Last announce confirming it
    pub last_seen: Instant,
    /// Lifetime after `last_seen`
    pub expiry: Duration,
}

impl Route {
    /// Whether the route has outlived its expiry
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) >= self.expiry
    }

    /// Egress interface
    pub fn interface(&self) -> InterfaceId {
        self.next_hop.interface
    }
}

/// How a competing announce is weighed against an existing route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicy {
    /// Replace only with a strictly lower hop count
    #[default]
    PreferLowerHops,
    /// Always take the most recent announce
    PreferNewest,
}

/// What [`RouteTable::learn`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteUpdate {
    /// No route existed
    Added,
    /// A better or fresher path replaced the old one
    Replaced,
    /// Same neighbour confirmed the existing route
    Refreshed,
    /// Existing route kept; nothing changed
    Kept,
}

impl RouteUpdate {
    /// Whether the forwarding path changed
    pub fn changed(self) -> bool {
        matches!(self, RouteUpdate::Added | RouteUpdate::Replaced)
    }
}

/// Table counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableStats {
    /// Routes added
    pub added: u64,
    /// Routes replaced
    pub replaced: u64,
    /// Routes refreshed
    pub refreshed: u64,
    /// Announces that left the route unchanged
    pub kept: u64,
    /// Routes removed by expiry
    pub expired: u64,
    /// Routes evicted for capacity
    pub evicted: u64,
}

/// Bounded route table
#[derive(Debug)]
pub struct RouteTable {
    routes: LruArena<Address, Route>,
    policy: ReplacementPolicy,
    stats: TableStats,
}

impl RouteTable {
    /// Create a table holding at most `capacity` routes
    pub fn new(capacity: usize, policy: ReplacementPolicy) -> Self {
        Self {
            routes: LruArena::new(capacity),
            policy,
            stats: TableStats::default(),
        }
    }

    /// Fold an announce-derived path into the table
    pub fn learn(
        &mut self,
        destination: Address,
        next_hop: NextHop,
        hop_count: u8,
        expiry: Duration,
        now: Instant,
    ) -> RouteUpdate {
        let policy = self.policy;
        let update = match self.routes.get_mut(&destination) {
            Some(route) => {
                let better = match policy {
                    ReplacementPolicy::PreferLowerHops => hop_count < route.hop_count,
                    ReplacementPolicy::PreferNewest => true,
                };
                if better || route.is_expired(now) {
                    debug!(
                        dest = %destination.short(),
                        old_hops = route.hop_count,
                        new_hops = hop_count,
                        via = %next_hop,
                        "route replaced"
                    );
                    *route = Route {
                        destination,
                        next_hop,
                        hop_count,
                        learned: now,
                        last_seen: now,
                        expiry,
                    };
                    RouteUpdate::Replaced
                } else if route.next_hop == next_hop {
                    route.last_seen = now;
                    RouteUpdate::Refreshed
                } else {
                    RouteUpdate::Kept
                }
            }
            None => {
                debug!(dest = %destination.short(), hops = hop_count, via = %next_hop, "route added");
                let route = Route {
                    destination,
                    next_hop,
                    hop_count,
                    learned: now,
                    last_seen: now,
                    expiry,
                };
                if let Some((evicted, _)) = self.routes.insert(destination, route) {
                    debug!(dest = %evicted.short(), "route table full, evicted least recently used");
                    self.stats.evicted += 1;
                }
                RouteUpdate::Added
            }
        };

        match update {
            RouteUpdate::Added => self.stats.added += 1,
            RouteUpdate::Replaced => {
                self.stats.replaced += 1;
                self.routes.touch(&destination);
            }
            RouteUpdate::Refreshed => {
                self.stats.refreshed += 1;
                self.routes.touch(&destination);
            }
            RouteUpdate::Kept => self.stats.kept += 1,
        }
        update
    }

    /// Live route for `destination`; expired routes are invisible
    pub fn lookup(&self, destination: &Address, now: Instant) -> Option<&Route> {
        self.routes
            .get(destination)
            .filter(|route| !route.is_expired(now))
    }

    /// Mark a route as used so it is the last to be evicted
    pub fn touch(&mut self, destination: &Address) {
        self.routes.touch(destination);
    }

    /// Remove the route for `destination`
    pub fn remove(&mut self, destination: &Address) -> Option<Route> {
        self.routes.remove(destination)
    }

    /// Drop every route through `interface`
    pub fn purge_interface(&mut self, interface: InterfaceId) -> usize {
        self.routes
            .retain(|_, route| route.interface() != interface)
            .len()
    }

    /// Remove expired routes and return them
    pub fn sweep(&mut self, now: Instant) -> Vec<Route> {
        let removed: Vec<Route> = self
            .routes
            .retain(|_, route| !route.is_expired(now))
            .into_iter()
            .map(|(_, route)| route)
            .collect();
        if !removed.is_empty() {
            debug!(count = removed.len(), "expired routes swept");
        }
        self.stats.expired += removed.len() as u64;
        removed
    }

    /// Number of routes, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Maximum number of routes
    pub fn capacity(&self) -> usize {
        self.routes.capacity()
    }

    /// Active replacement policy
    pub fn policy(&self) -> ReplacementPolicy {
        self.policy
    }

    /// Iterate over all routes
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter().map(|(_, route)| route)
    }

    /// Table counters
    pub fn stats(&self) -> &TableStats {
        &self.stats
    }
}
