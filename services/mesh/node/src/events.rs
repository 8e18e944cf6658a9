//! Event notification for local applications

use bytes::Bytes;
use mesh_routing::{DropReason, InterfaceId, NextHop};
use mesh_transfer::{Direction, FileMetadata, TransferError};
use mesh_wire::{Address, PublicIdentity, TransferId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Something that happened in the node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// An unfragmented DATA payload addressed to us
    DataReceived {
        /// Verified sender, if the signature matched a known identity
        source: Option<Address>,
        /// Payload, decrypted if it was encrypted
        payload: Bytes,
        /// Hops the packet travelled
        hop_count: u8,
        /// Whether the payload arrived encrypted
        encrypted: bool,
    },
    /// First announce from a node
    PeerDiscovered {
        /// Its address
        address: Address,
        /// Its public keys
        identity: PublicIdentity,
        /// Hops away
        hop_count: u8,
        /// Interface the announce arrived on
        interface: InterfaceId,
    },
    /// A route was added or replaced
    RouteChanged {
        /// Destination
        destination: Address,
        /// New next hop
        next_hop: NextHop,
        /// New hop count
        hop_count: u8,
    },
    /// A route aged out
    RouteExpired {
        /// Destination
        destination: Address,
    },
    /// Fragments received or acknowledged
    TransferProgress {
        /// Transfer concerned
        transfer_id: TransferId,
        /// Which side
        direction: Direction,
        /// Fragments done
        done: usize,
        /// Total fragments, if known
        total: Option<usize>,
    },
    /// An inbound transfer reassembled
    FileReceived {
        /// Transfer concerned
        transfer_id: TransferId,
        /// Verified sender, if known
        source: Option<Address>,
        /// File header, when the data carried one
        metadata: Option<FileMetadata>,
        /// File data
        data: Bytes,
    },
    /// An outbound transfer was fully delivered
    TransferSent {
        /// Transfer concerned
        transfer_id: TransferId,
        /// Receiving node
        destination: Address,
    },
    /// A transfer was abandoned
    TransferFailed {
        /// Transfer concerned
        transfer_id: TransferId,
        /// Which side
        direction: Direction,
        /// Why
        error: TransferError,
    },
    /// A transfer was cancelled locally
    TransferCancelled {
        /// Transfer concerned
        transfer_id: TransferId,
    },
    /// A locally originated packet could not be sent
    DeliveryFailed {
        /// Intended destination
        destination: Address,
        /// Why
        reason: DropReason,
    },
}

impl NodeEvent {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            NodeEvent::DataReceived { .. } => "data_received",
            NodeEvent::PeerDiscovered { .. } => "peer_discovered",
            NodeEvent::RouteChanged { .. } => "route_changed",
            NodeEvent::RouteExpired { .. } => "route_expired",
            NodeEvent::TransferProgress { .. } => "transfer_progress",
            NodeEvent::FileReceived { .. } => "file_received",
            NodeEvent::TransferSent { .. } => "transfer_sent",
            NodeEvent::TransferFailed { .. } => "transfer_failed",
            NodeEvent::TransferCancelled { .. } => "transfer_cancelled",
            NodeEvent::DeliveryFailed { .. } => "delivery_failed",
        }
    }
}

/// Event with delivery bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Monotonic per-notifier sequence, from 1
    pub sequence: u64,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
    /// The event
    pub event: NodeEvent,
}

/// Event notifier for sending node events to the application
#[derive(Debug, Clone)]
pub struct EventNotifier {
    /// Channel to the application
    event_tx: mpsc::UnboundedSender<EventEnvelope>,
    /// Sequence number for events
    sequence_counter: Arc<AtomicU64>,
}

impl EventNotifier {
    /// Create a notifier sending on `event_tx`
    pub fn new(event_tx: mpsc::UnboundedSender<EventEnvelope>) -> Self {
        Self {
            event_tx,
            sequence_counter: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a notifier and the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Send an event; a closed receiver only loses the event
    pub fn notify(&self, event: NodeEvent) {
        let envelope = EventEnvelope {
            sequence: self.next_sequence(),
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            event,
        };
        let kind = envelope.event.kind();
        let sequence = envelope.sequence;
        if self.event_tx.send(envelope).is_err() {
            debug!(kind, sequence, "Event receiver closed, dropping event");
        } else {
            debug!(kind, sequence, "Sent node event");
        }
    }
}
