//! Node configuration and resource profiles.

use mesh_routing::{
    EngineConfig, InterfaceConfig, ReplacementPolicy, DEFAULT_ANNOUNCE_QUEUE, DEFAULT_MAX_HOPS,
    DEFAULT_SEEN_CAPACITY,
};
use mesh_storage::IdentityCacheConfig;
use mesh_transfer::TransferConfig;
use mesh_wire::{DEFAULT_TTL, MAX_FRAGMENT_DATA};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::NodeError;

/// Resource class of the device running the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Microcontroller: single loop, small tables
    Constrained,
    /// Desktop or server
    #[default]
    Capable,
}

impl Profile {
    /// Route table capacity
    pub fn route_capacity(self) -> usize {
        match self {
            Profile::Constrained => 100,
            Profile::Capable => 100_000,
        }
    }

    /// Identity cache capacity
    pub fn identity_capacity(self) -> usize {
        match self {
            Profile::Constrained => 50,
            Profile::Capable => 50_000,
        }
    }

    /// Concurrent transfers per direction
    pub fn max_transfers(self) -> usize {
        match self {
            Profile::Constrained => 4,
            Profile::Capable => 64,
        }
    }
}

/// Transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Data bytes per fragment
    pub fragment_size: usize,
    /// Largest transfer in bytes
    pub max_transfer_size: usize,
    /// Unacknowledged fragments in flight
    pub window: usize,
    /// Seconds before an unacknowledged fragment is resent
    pub retransmit_timeout_secs: u64,
    /// Resends per fragment
    pub max_retries: u32,
    /// Seconds of silence before transfer state is dropped
    pub inactivity_timeout_secs: u64,
    /// Wait for per-fragment acknowledgements
    pub require_ack: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        let defaults = TransferConfig::default();
        Self {
            fragment_size: defaults.fragment_size,
            max_transfer_size: defaults.max_transfer_size,
            window: defaults.window,
            retransmit_timeout_secs: defaults.retransmit_timeout.as_secs(),
            max_retries: defaults.max_retries,
            inactivity_timeout_secs: defaults.inactivity_timeout.as_secs(),
            require_ack: defaults.require_ack,
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Human-readable node name
    pub name: String,
    /// Resource profile supplying default capacities
    pub profile: Profile,
    /// Route table capacity override
    pub route_capacity: Option<usize>,
    /// Identity cache capacity override
    pub identity_capacity: Option<usize>,
    /// Concurrent transfer override
    pub max_transfers: Option<usize>,
    /// Hop limit for learning and relaying announces
    pub max_hops: u8,
    /// TTL of locally originated packets
    pub default_ttl: u8,
    /// Route replacement rule
    pub replacement_policy: ReplacementPolicy,
    /// Duplicate-suppression capacity
    pub seen_capacity: usize,
    /// Duplicate-suppression window in seconds
    pub seen_window_secs: u64,
    /// Announce queue depth per interface
    pub announce_queue: usize,
    /// Seconds after which unseen identities are forgotten
    pub identity_stale_secs: u64,
    /// Sign locally originated DATA packets
    pub sign_data: bool,
    /// Broadcast locally originated packets that have no route
    pub flood_unrouted: bool,
    /// Transfer settings
    pub transfer: TransferSettings,
    /// Interfaces
    pub interfaces: Vec<InterfaceConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "hypha".to_string(),
            profile: Profile::default(),
            route_capacity: None,
            identity_capacity: None,
            max_transfers: None,
            max_hops: DEFAULT_MAX_HOPS,
            default_ttl: DEFAULT_TTL,
            replacement_policy: ReplacementPolicy::default(),
            seen_capacity: DEFAULT_SEEN_CAPACITY,
            seen_window_secs: 5,
            announce_queue: DEFAULT_ANNOUNCE_QUEUE,
            identity_stale_secs: 24 * 60 * 60,
            sign_data: true,
            flood_unrouted: true,
            transfer: TransferSettings::default(),
            interfaces: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Defaults for a profile
    pub fn for_profile(profile: Profile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    /// Check values that would make the node misbehave
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.default_ttl == 0 {
            return Err(NodeError::Config("default_ttl must be at least 1".into()));
        }
        if self.transfer.fragment_size == 0 || self.transfer.fragment_size > MAX_FRAGMENT_DATA {
            return Err(NodeError::Config(format!(
                "fragment_size must be between 1 and {}",
                MAX_FRAGMENT_DATA
            )));
        }
        if self.transfer.window == 0 {
            return Err(NodeError::Config("transfer window must be at least 1".into()));
        }
        let mut ids = HashSet::new();
        for interface in &self.interfaces {
            if !ids.insert(interface.id) {
                return Err(NodeError::Config(format!(
                    "duplicate interface id {}",
                    interface.id
                )));
            }
        }
        Ok(())
    }

    /// Forwarding engine settings
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_hops: self.max_hops,
            route_capacity: self
                .route_capacity
                .unwrap_or_else(|| self.profile.route_capacity()),
            replacement_policy: self.replacement_policy,
            seen_capacity: self.seen_capacity,
            seen_window: Duration::from_secs(self.seen_window_secs),
            announce_queue_capacity: self.announce_queue,
        }
    }

    /// Identity cache settings
    pub fn cache_config(&self) -> IdentityCacheConfig {
        IdentityCacheConfig {
            capacity: self
                .identity_capacity
                .unwrap_or_else(|| self.profile.identity_capacity()),
            stale_horizon: Duration::from_secs(self.identity_stale_secs),
        }
    }

    /// Transfer manager settings
    pub fn transfer_config(&self) -> TransferConfig {
        let max = self
            .max_transfers
            .unwrap_or_else(|| self.profile.max_transfers());
        TransferConfig {
            fragment_size: self.transfer.fragment_size,
            max_transfer_size: self.transfer.max_transfer_size,
            max_inbound: max,
            max_outbound: max,
            window: self.transfer.window,
            retransmit_timeout: Duration::from_secs(self.transfer.retransmit_timeout_secs),
            max_retries: self.transfer.max_retries,
            inactivity_timeout: Duration::from_secs(self.transfer.inactivity_timeout_secs),
            require_ack: self.transfer.require_ack,
        }
    }
}
