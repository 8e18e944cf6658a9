//! Next hop definitions and utilities

use mesh_wire::Address;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::net::SocketAddr;

/// Local interface identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceId(pub u8);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// Opaque link-layer handle for a neighbour, supplied by the interface driver.
///
/// An empty handle means the link cannot tell neighbours apart (a raw radio).
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct LinkPeer(SmallVec<[u8; 18]>);

impl LinkPeer {
    /// Handle for links that do not identify senders
    pub fn anonymous() -> Self {
        LinkPeer(SmallVec::new())
    }

    /// Handle from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        LinkPeer(SmallVec::from_slice(bytes))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether the handle identifies nobody
    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    /// Recover a socket address encoded by `From<SocketAddr>`
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let b = self.as_bytes();
        match b.len() {
            6 => {
                let ip = std::net::Ipv4Addr::new(b[0], b[1], b[2], b[3]);
                Some(SocketAddr::from((ip, u16::from_be_bytes([b[4], b[5]]))))
            }
            18 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&b[..16]);
                let ip = std::net::Ipv6Addr::from(octets);
                Some(SocketAddr::from((ip, u16::from_be_bytes([b[16], b[17]]))))
            }
            _ => None,
        }
    }
}

impl From<SocketAddr> for LinkPeer {
    fn from(addr: SocketAddr) -> Self {
        let mut bytes: SmallVec<[u8; 18]> = SmallVec::new();
        match addr {
            SocketAddr::V4(v4) => bytes.extend_from_slice(&v4.ip().octets()),
            SocketAddr::V6(v6) => bytes.extend_from_slice(&v6.ip().octets()),
        }
        bytes.extend_from_slice(&addr.port().to_be_bytes());
        LinkPeer(bytes)
    }
}

impl From<Address> for LinkPeer {
    fn from(addr: Address) -> Self {
        LinkPeer::from_bytes(addr.as_bytes())
    }
}

impl fmt::Display for LinkPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            return f.write_str("*");
        }
        match self.socket_addr() {
            Some(addr) => write!(f, "{addr}"),
            None => {
                for b in self.0.iter() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for LinkPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkPeer({self})")
    }
}

/// A next hop for routing: where to send and to whom
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NextHop {
    /// Egress interface
    pub interface: InterfaceId,
    /// Neighbour on that interface
    pub peer: LinkPeer,
}

impl NextHop {
    /// Create a new next hop
    pub fn new(interface: InterfaceId, peer: LinkPeer) -> Self {
        Self { interface, peer }
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.interface, self.peer)
    }
}
