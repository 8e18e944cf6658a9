//! UDP link driver.
//!
//! Stands in for a radio when running nodes on a LAN. A broadcast goes to
//! every configured peer plus every peer heard from since startup.

use async_trait::async_trait;
use bytes::Bytes;
use mesh_node::{Link, LinkError, Received};
use mesh_routing::{InterfaceId, LinkPeer};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Largest datagram the link accepts
pub const UDP_MTU: usize = 1400;

/// A [`Link`] over one UDP socket
#[derive(Debug)]
pub struct UdpLink {
    id: InterfaceId,
    socket: UdpSocket,
    peers: RwLock<Vec<SocketAddr>>,
}

impl UdpLink {
    /// Bind `listen` and serve interface `id`
    pub async fn bind(
        id: InterfaceId,
        listen: SocketAddr,
        peers: Vec<SocketAddr>,
    ) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(listen).await?;
        info!(interface = %id, local = %socket.local_addr()?, peers = peers.len(), "UDP link bound");
        Ok(Self {
            id,
            socket,
            peers: RwLock::new(peers),
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.socket.local_addr()?)
    }

    /// Current broadcast set
    pub async fn peers(&self) -> Vec<SocketAddr> {
        self.peers.read().await.clone()
    }

    async fn learn(&self, addr: SocketAddr) {
        if self.peers.read().await.contains(&addr) {
            return;
        }
        let mut peers = self.peers.write().await;
        if !peers.contains(&addr) {
            debug!(interface = %self.id, peer = %addr, "Learned UDP peer");
            peers.push(addr);
        }
    }
}

#[async_trait]
impl Link for UdpLink {
    fn id(&self) -> InterfaceId {
        self.id
    }

    fn mtu(&self) -> usize {
        UDP_MTU
    }

    async fn send(&self, peer: Option<&LinkPeer>, bytes: &[u8]) -> Result<(), LinkError> {
        if bytes.len() > UDP_MTU {
            return Err(LinkError::Oversize {
                len: bytes.len(),
                mtu: UDP_MTU,
            });
        }
        match peer {
            Some(peer) => {
                let addr = peer
                    .socket_addr()
                    .ok_or_else(|| LinkError::UnknownPeer(peer.to_string()))?;
                self.socket.send_to(bytes, addr).await?;
            }
            None => {
                for addr in self.peers().await {
                    self.socket.send_to(bytes, addr).await?;
                }
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Received, LinkError> {
        let mut buf = vec![0u8; UDP_MTU];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        self.learn(from).await;
        Ok(Received {
            bytes: Bytes::from(buf),
            peer: LinkPeer::from(from),
            rssi: None,
        })
    }
}
