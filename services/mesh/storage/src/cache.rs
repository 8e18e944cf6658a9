//! Address to identity cache.
//!
//! Remembers the public keys learned from announces so that signed and encrypted
//! traffic can be verified and addressed. The cache performs no cryptographic
//! checks itself; callers verify before observing.

use mesh_wire::{Address, PublicIdentity};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::arena::LruArena;
use crate::StorageError;

/// Default number of cached identities
pub const DEFAULT_IDENTITY_CAPACITY: usize = 1000;

/// Default staleness horizon (one day)
pub const DEFAULT_STALE_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);

/// Where and how an identity was last heard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IdentityMetadata {
    /// Interface the announce arrived on
    pub interface: u8,
    /// Received signal strength, when the link reports one
    pub rssi: Option<i16>,
    /// Hops the announce had travelled
    pub hop_count: u8,
}

/// Cached identity with bookkeeping
#[derive(Debug, Clone)]
pub struct CachedIdentity {
    /// Public keys
    pub identity: PublicIdentity,
    /// Latest observation metadata
    pub metadata: IdentityMetadata,
    /// First observation
    pub first_seen: Instant,
    /// Latest observation
    pub last_seen: Instant,
}

/// Result of an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Address was not cached before
    New,
    /// Same keys seen again
    Refreshed,
    /// Keys differ from what was cached (the new ones are kept)
    KeysChanged,
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct IdentityCacheConfig {
    /// Maximum number of identities
    pub capacity: usize,
    /// Entries not seen for this long are dropped by [`IdentityCache::evict_stale`]
    pub stale_horizon: Duration,
}

impl Default for IdentityCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_IDENTITY_CAPACITY,
            stale_horizon: DEFAULT_STALE_HORIZON,
        }
    }
}

/// Capacity-bounded identity cache with least-recently-seen eviction
#[derive(Debug)]
pub struct IdentityCache {
    entries: LruArena<Address, CachedIdentity>,
    stale_horizon: Duration,
    evictions: u64,
}

impl IdentityCache {
    /// Create a cache from configuration
    pub fn new(config: &IdentityCacheConfig) -> Self {
        Self {
            entries: LruArena::new(config.capacity),
            stale_horizon: config.stale_horizon,
            evictions: 0,
        }
    }

    /// Record that `address` announced `identity`.
    ///
    /// Rejects identities whose derived address differs from `address`.
    pub fn observe(
        &mut self,
        address: Address,
        identity: PublicIdentity,
        metadata: IdentityMetadata,
        now: Instant,
    ) -> Result<Observation, StorageError> {
        let derived = identity.address();
        if derived != address {
            return Err(StorageError::AddressMismatch {
                claimed: address,
                derived,
            });
        }

        if let Some(entry) = self.entries.get_mut(&address) {
            let outcome = if entry.identity == identity {
                Observation::Refreshed
            } else {
                warn!(%address, "cached identity keys changed");
                entry.identity = identity;
                Observation::KeysChanged
            };
            entry.metadata = metadata;
            entry.last_seen = now;
            self.entries.touch(&address);
            return Ok(outcome);
        }

        let cached = CachedIdentity {
            identity,
            metadata,
            first_seen: now,
            last_seen: now,
        };
        if let Some((evicted, _)) = self.entries.insert(address, cached) {
            self.evictions += 1;
            debug!(address = %evicted.short(), "identity cache full, evicted oldest");
        }
        Ok(Observation::New)
    }

    /// Public keys for `address`
    pub fn lookup(&self, address: &Address) -> Option<&PublicIdentity> {
        self.entries.get(address).map(|e| &e.identity)
    }

    /// Full entry for `address`
    pub fn get(&self, address: &Address) -> Option<&CachedIdentity> {
        self.entries.get(address)
    }

    /// Drop entries last seen before `now - horizon`; returns how many went
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let horizon = self.stale_horizon;
        let removed = self
            .entries
            .retain(|_, e| now.saturating_duration_since(e.last_seen) < horizon);
        if !removed.is_empty() {
            debug!(count = removed.len(), "evicted stale identities");
        }
        self.evictions += removed.len() as u64;
        removed.len()
    }

    /// First identity (most recently seen first) accepted by `matches`.
    ///
    /// Used to attribute a signature to a sender when the packet carries no
    /// source address.
    pub fn find_signer<F>(&self, mut matches: F) -> Option<Address>
    where
        F: FnMut(&PublicIdentity) -> bool,
    {
        self.entries
            .iter_recent()
            .find(|(_, e)| matches(&e.identity))
            .map(|(addr, _)| *addr)
    }

    /// Number of cached identities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total evictions (capacity and staleness)
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Iterate over cached identities, most recently seen first
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &CachedIdentity)> {
        self.entries.iter_recent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(seed: u8) -> PublicIdentity {
        PublicIdentity::new([seed; 32], [seed.wrapping_add(100); 32])
    }

    fn cache(capacity: usize) -> IdentityCache {
        IdentityCache::new(&IdentityCacheConfig {
            capacity,
            stale_horizon: Duration::from_secs(60),
        })
    }

    #[test]
    fn test_observe_and_lookup() {
        let mut cache = cache(4);
        let now = Instant::now();
        let id = identity(1);

        assert_eq!(
            cache.observe(id.address(), id, IdentityMetadata::default(), now).unwrap(),
            Observation::New
        );
        assert_eq!(cache.lookup(&id.address()), Some(&id));
        assert_eq!(
            cache.observe(id.address(), id, IdentityMetadata::default(), now).unwrap(),
            Observation::Refreshed
        );
        assert!(cache.lookup(&identity(2).address()).is_none());
    }

    #[test]
    fn test_rejects_mismatched_address() {
        let mut cache = cache(4);
        let err = cache
            .observe(
                identity(2).address(),
                identity(1),
                IdentityMetadata::default(),
                Instant::now(),
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::AddressMismatch { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evicts_least_recently_seen() {
        let mut cache = cache(2);
        let now = Instant::now();
        for seed in [1u8, 2, 1, 3] {
            let id = identity(seed);
            cache
                .observe(id.address(), id, IdentityMetadata::default(), now)
                .unwrap();
        }
        assert!(cache.lookup(&identity(1).address()).is_some());
        assert!(cache.lookup(&identity(2).address()).is_none());
        assert!(cache.lookup(&identity(3).address()).is_some());
        assert_eq!(cache.evictions(), 1);
    }

    #[test]
    fn test_evict_stale() {
        let mut cache = cache(8);
        let start = Instant::now();
        let old = identity(1);
        let fresh = identity(2);
        cache
            .observe(old.address(), old, IdentityMetadata::default(), start)
            .unwrap();
        cache
            .observe(
                fresh.address(),
                fresh,
                IdentityMetadata::default(),
                start + Duration::from_secs(50),
            )
            .unwrap();

        assert_eq!(cache.evict_stale(start + Duration::from_secs(70)), 1);
        assert!(cache.lookup(&old.address()).is_none());
        assert!(cache.lookup(&fresh.address()).is_some());
    }

    #[test]
    fn test_find_signer() {
        let mut cache = cache(8);
        let now = Instant::now();
        for seed in 1..=3u8 {
            let id = identity(seed);
            cache
                .observe(id.address(), id, IdentityMetadata::default(), now)
                .unwrap();
        }
        let wanted = identity(2);
        let found = cache.find_signer(|candidate| candidate.signing_key == wanted.signing_key);
        assert_eq!(found, Some(wanted.address()));
        assert_eq!(cache.find_signer(|_| false), None);
    }
}
