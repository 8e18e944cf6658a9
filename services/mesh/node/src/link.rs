//! Physical-layer collaborator.
//!
//! A link moves opaque packet bytes for one interface. Drivers (radio, UDP,
//! test harnesses) implement [`Link`]; the node only produces
//! [`Transmission`](crate::Transmission)s and consumes received bytes.

use async_trait::async_trait;
use bytes::Bytes;
use mesh_routing::{InterfaceId, LinkPeer};
use thiserror::Error;

/// Link failures
#[derive(Error, Debug)]
pub enum LinkError {
    /// I/O error from the underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame exceeds what the link can carry
    #[error("Frame of {len} bytes exceeds link MTU {mtu}")]
    Oversize {
        /// Frame length
        len: usize,
        /// Link limit
        mtu: usize,
    },

    /// Peer handle does not belong to this link
    #[error("Unknown peer {0}")]
    UnknownPeer(String),

    /// Link has been shut down
    #[error("Link closed")]
    Closed,
}

/// One frame received from a link
#[derive(Debug, Clone)]
pub struct Received {
    /// Raw packet bytes
    pub bytes: Bytes,
    /// Neighbour the frame came from
    pub peer: LinkPeer,
    /// Signal strength, when the link reports it
    pub rssi: Option<i16>,
}

/// A packet transport bound to one interface
#[async_trait]
pub trait Link: Send + Sync {
    /// Interface this link serves
    fn id(&self) -> InterfaceId;

    /// Largest frame the link carries
    fn mtu(&self) -> usize {
        usize::from(u16::MAX)
    }

    /// Send `bytes` to `peer`, or to every neighbour when `peer` is `None`
    async fn send(&self, peer: Option<&LinkPeer>, bytes: &[u8]) -> Result<(), LinkError>;

    /// Wait for the next frame
    async fn recv(&self) -> Result<Received, LinkError>;
}
