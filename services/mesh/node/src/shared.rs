//! Node shared between tasks.
//!
//! On hosts with an async runtime the receive path and the periodic
//! maintenance path run as separate tasks. [`SharedNode`] wraps the
//! synchronous [`Node`] in a mutex; every method takes the lock for exactly
//! one node operation and link I/O happens after it is released.

use bytes::Bytes;
use mesh_routing::{Arrival, RouterStats};
use mesh_transfer::FileMetadata;
use mesh_wire::{Address, TransferId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Clock, Link, LinkError, Node, NodeError, NodeStats, Received, Transmission};

/// Cloneable handle to a node behind a mutex
#[derive(Debug, Clone)]
pub struct SharedNode {
    inner: Arc<Mutex<Node>>,
    address: Address,
}

impl SharedNode {
    /// Share `node`
    pub fn new(node: Node) -> Self {
        let address = node.address();
        Self {
            inner: Arc::new(Mutex::new(node)),
            address,
        }
    }

    /// Local address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Run one synchronous operation under the lock
    pub async fn with<R>(&self, op: impl FnOnce(&mut Node) -> R) -> R {
        let mut node = self.inner.lock().await;
        op(&mut node)
    }

    /// Process a frame received on `link`
    pub async fn handle_receive(
        &self,
        link: &dyn Link,
        received: Received,
        clock: &dyn Clock,
    ) -> Vec<Transmission> {
        let arrival = Arrival {
            interface: link.id(),
            peer: received.peer,
            rssi: received.rssi,
        };
        self.with(|node| node.handle_receive(received.bytes, &arrival, clock.now()))
            .await
    }

    /// Announce the local identity
    pub async fn announce(&self, clock: &dyn Clock) -> Result<Vec<Transmission>, NodeError> {
        self.with(|node| node.announce(clock.now())).await
    }

    /// Send a single DATA packet
    pub async fn send_data(
        &self,
        destination: Address,
        payload: Bytes,
        encrypt: bool,
        clock: &dyn Clock,
    ) -> Result<Vec<Transmission>, NodeError> {
        self.with(|node| node.send_data(destination, payload, encrypt, clock.now()))
            .await
    }

    /// Start a file transfer
    pub async fn send_file(
        &self,
        destination: Address,
        metadata: FileMetadata,
        data: Bytes,
        clock: &dyn Clock,
    ) -> Result<TransferId, NodeError> {
        self.with(|node| node.send_file(destination, &metadata, &data, clock.now()))
            .await
    }

    /// Cancel a transfer
    pub async fn cancel_transfer(&self, id: TransferId) -> bool {
        self.with(|node| node.cancel_transfer(&id)).await
    }

    /// Periodic work
    pub async fn tick(&self, clock: &dyn Clock) -> Vec<Transmission> {
        self.with(|node| node.tick(clock.now())).await
    }

    /// Snapshot of node and routing counters
    pub async fn stats(&self) -> (NodeStats, RouterStats) {
        self.with(|node| (node.stats().clone(), node.router_stats()))
            .await
    }

    /// Run [`Node::tick`] every `period` and put the results on `links`
    pub fn spawn_maintenance(
        &self,
        period: Duration,
        links: Vec<Arc<dyn Link>>,
        clock: Arc<dyn Clock>,
    ) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let out = node.tick(clock.as_ref()).await;
                transmit(&links, out).await;
            }
        })
    }

    /// Feed every frame `link` receives into the node until the link closes
    pub fn spawn_receiver(
        &self,
        link: Arc<dyn Link>,
        links: Vec<Arc<dyn Link>>,
        clock: Arc<dyn Clock>,
    ) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            loop {
                match link.recv().await {
                    Ok(received) => {
                        let out = node
                            .handle_receive(link.as_ref(), received, clock.as_ref())
                            .await;
                        transmit(&links, out).await;
                    }
                    Err(LinkError::Closed) => {
                        info!(interface = %link.id(), "Link closed, receiver stopping");
                        break;
                    }
                    Err(e) => warn!(interface = %link.id(), error = %e, "Link receive failed"),
                }
            }
        })
    }
}

/// Hand transmissions to the links serving their interfaces
pub async fn transmit(links: &[Arc<dyn Link>], transmissions: Vec<Transmission>) {
    for tx in transmissions {
        let Some(link) = links.iter().find(|l| l.id() == tx.interface) else {
            debug!(interface = %tx.interface, "No link for interface, dropping transmission");
            continue;
        };
        if let Err(e) = link.send(tx.peer.as_ref(), &tx.bytes).await {
            warn!(interface = %tx.interface, error = %e, "Link send failed");
        }
    }
}
