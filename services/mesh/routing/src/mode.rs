//! Interface operating modes and their bandwidth and forwarding policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How an interface participates in the mesh
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceMode {
    /// Ordinary mesh member
    #[default]
    Full = 0x01,
    /// Bridges to another network; keeps routes longer
    Gateway = 0x02,
    /// Edge of a segment; only relays nearby announces
    Boundary = 0x03,
    /// Serves attached clients; never relays announces
    AccessPoint = 0x04,
    /// Mobile; routes go stale quickly
    Roaming = 0x05,
}

/// Static policy attached to a mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModePolicy {
    /// Fraction of interface bandwidth announces may use
    pub announce_budget: f64,
    /// Largest hop count an announce may leave with; `Some(0)` means never relay
    pub max_rebroadcast_hops: Option<u8>,
    /// Lifetime of routes learned on the interface
    pub route_expiry: Duration,
    /// Period of local re-announcement; `None` keeps the interface quiet
    pub announce_interval: Option<Duration>,
}

impl ModePolicy {
    /// Whether an announce leaving with `hop_count` hops may be relayed
    pub fn relays_announce(&self, hop_count: u8) -> bool {
        if self.announce_budget <= 0.0 {
            return false;
        }
        match self.max_rebroadcast_hops {
            Some(limit) => hop_count <= limit,
            None => true,
        }
    }
}

const MINUTE: u64 = 60;

static POLICIES: [ModePolicy; 5] = [
    // Full
    ModePolicy {
        announce_budget: 0.02,
        max_rebroadcast_hops: None,
        route_expiry: Duration::from_secs(30 * MINUTE),
        announce_interval: Some(Duration::from_secs(5 * MINUTE)),
    },
    // Gateway
    ModePolicy {
        announce_budget: 0.02,
        max_rebroadcast_hops: None,
        route_expiry: Duration::from_secs(60 * MINUTE),
        announce_interval: Some(Duration::from_secs(5 * MINUTE)),
    },
    // Boundary
    ModePolicy {
        announce_budget: 0.01,
        max_rebroadcast_hops: Some(3),
        route_expiry: Duration::from_secs(30 * MINUTE),
        announce_interval: Some(Duration::from_secs(10 * MINUTE)),
    },
    // AccessPoint
    ModePolicy {
        announce_budget: 0.0,
        max_rebroadcast_hops: Some(0),
        route_expiry: Duration::from_secs(30 * MINUTE),
        announce_interval: None,
    },
    // Roaming
    ModePolicy {
        announce_budget: 0.02,
        max_rebroadcast_hops: None,
        route_expiry: Duration::from_secs(2 * MINUTE),
        announce_interval: Some(Duration::from_secs(MINUTE)),
    },
];

impl InterfaceMode {
    /// Policy record for this mode
    pub fn policy(self) -> &'static ModePolicy {
        &POLICIES[self as usize - 1]
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            InterfaceMode::Full => "full",
            InterfaceMode::Gateway => "gateway",
            InterfaceMode::Boundary => "boundary",
            InterfaceMode::AccessPoint => "access_point",
            InterfaceMode::Roaming => "roaming",
        }
    }
}

impl TryFrom<u8> for InterfaceMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(InterfaceMode::Full),
            0x02 => Ok(InterfaceMode::Gateway),
            0x03 => Ok(InterfaceMode::Boundary),
            0x04 => Ok(InterfaceMode::AccessPoint),
            0x05 => Ok(InterfaceMode::Roaming),
            _ => Err(format!("unknown interface mode {value}")),
        }
    }
}

impl FromStr for InterfaceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(InterfaceMode::Full),
            "gateway" => Ok(InterfaceMode::Gateway),
            "boundary" => Ok(InterfaceMode::Boundary),
            "access_point" | "ap" => Ok(InterfaceMode::AccessPoint),
            "roaming" => Ok(InterfaceMode::Roaming),
            other => Err(format!("unknown interface mode '{other}'")),
        }
    }
}

impl fmt::Display for InterfaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
