//! The node context.
//!
//! A [`Node`] owns every piece of mesh state for one local identity: the
//! forwarding engine and its route table, the identity cache, and the transfer
//! manager. All methods are synchronous and take `now` explicitly; anything
//! that must go on the air is returned as [`Transmission`]s for the caller to
//! hand to its links.

use bytes::Bytes;
use mesh_routing::{
    Arrival, DropReason, ForwardingEngine, InterfaceConfig, InterfaceId, LinkPeer, NextHop,
    RouterStats, RoutingDecision,
};
use mesh_storage::{IdentityCache, IdentityMetadata, Observation};
use mesh_transfer::{
    Direction, FileMetadata, OutgoingFragment, TransferError, TransferEvent, TransferManager,
};
use mesh_wire::{
    Address, Flags, Fragment, FragmentAck, Packet, PacketBuilder, PacketType, PublicIdentity,
    TransferId,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::{CryptoProvider, EventNotifier, NodeConfig, NodeError, NodeEvent};

/// Bytes to put on one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    /// Egress interface
    pub interface: InterfaceId,
    /// Neighbour to address, or `None` to broadcast
    pub peer: Option<LinkPeer>,
    /// Encoded packet
    pub bytes: Bytes,
}

impl Transmission {
    /// Broadcast on `interface`
    pub fn broadcast(interface: InterfaceId, bytes: Bytes) -> Self {
        Self {
            interface,
            peer: None,
            bytes,
        }
    }

    /// Send towards `hop`; anonymous peers become broadcasts
    pub fn to(hop: &NextHop, bytes: Bytes) -> Self {
        Self {
            interface: hop.interface,
            peer: (!hop.peer.is_anonymous()).then(|| hop.peer.clone()),
            bytes,
        }
    }
}

/// Node-level counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeStats {
    /// Frames handed to [`Node::handle_receive`]
    pub packets_received: u64,
    /// Frames or fragments that failed to decode
    pub decode_errors: u64,
    /// Announces with a missing or invalid signature
    pub bad_signatures: u64,
    /// Signed DATA from signers not in the identity cache
    pub unauthenticated: u64,
    /// Encrypted payloads that failed to decrypt
    pub decrypt_failures: u64,
    /// Fragment acks sent
    pub acks_sent: u64,
    /// Fragment acks received
    pub acks_received: u64,
    /// Keepalives addressed to us
    pub keepalives: u64,
    /// Path requests addressed to us
    pub path_requests: u64,
    /// Path responses addressed to us
    pub path_responses: u64,
    /// Unrouted local packets broadcast on every interface
    pub flooded: u64,
    /// Local packets that could not be sent
    pub undeliverable: u64,
}

/// Mesh node state for one local identity
pub struct Node {
    config: NodeConfig,
    crypto: Arc<dyn CryptoProvider>,
    identity: PublicIdentity,
    address: Address,
    engine: ForwardingEngine,
    identities: IdentityCache,
    transfers: TransferManager,
    notifier: EventNotifier,
    stats: NodeStats,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.config.name)
            .field("address", &self.address)
            .field("routes", &self.engine.routes().len())
            .field("identities", &self.identities.len())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Create a node for the identity held by `crypto`
    pub fn new(
        config: NodeConfig,
        crypto: Arc<dyn CryptoProvider>,
        notifier: EventNotifier,
        now: Instant,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let identity = crypto.identity();
        let address = identity.address();

        let mut engine = ForwardingEngine::new(address, &config.engine_config());
        for interface in &config.interfaces {
            engine.add_interface(interface.clone(), now);
        }
        let identities = IdentityCache::new(&config.cache_config());
        let transfers = TransferManager::new(config.transfer_config());

        info!(
            name = %config.name,
            address = %address,
            profile = ?config.profile,
            interfaces = config.interfaces.len(),
            "Node created"
        );

        Ok(Self {
            config,
            crypto,
            identity,
            address,
            engine,
            identities,
            transfers,
            notifier,
            stats: NodeStats::default(),
        })
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Local address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Local public identity
    pub fn identity(&self) -> PublicIdentity {
        self.identity
    }

    /// Active configuration
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Forwarding engine
    pub fn engine(&self) -> &ForwardingEngine {
        &self.engine
    }

    /// Identity cache
    pub fn identities(&self) -> &IdentityCache {
        &self.identities
    }

    /// Transfer manager
    pub fn transfers(&self) -> &TransferManager {
        &self.transfers
    }

    /// Node counters
    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Routing counters
    pub fn router_stats(&self) -> RouterStats {
        self.engine.stats()
    }

    /// Register an interface at runtime
    pub fn add_interface(&mut self, interface: InterfaceConfig, now: Instant) {
        self.engine.add_interface(interface, now);
    }

    /// Bring an interface up or down
    pub fn set_interface_online(&mut self, id: InterfaceId, online: bool) -> bool {
        self.engine.set_online(id, online)
    }

    fn build(
        &self,
        packet_type: PacketType,
        destination: Address,
        flags: Flags,
        payload: Bytes,
        sign: bool,
    ) -> Result<Packet, NodeError> {
        let builder = PacketBuilder::new(packet_type, destination)
            .with_ttl(self.config.default_ttl)
            .with_flags(flags)
            .payload(payload);
        let packet = if sign {
            builder.sign_with(|input| self.crypto.sign(input))?
        } else {
            builder.build()?
        };
        Ok(packet)
    }

    fn announce_packet(&self) -> Result<Packet, NodeError> {
        self.build(
            PacketType::Announce,
            self.address,
            Flags::empty(),
            Bytes::copy_from_slice(&self.identity.to_bytes()),
            true,
        )
    }

    fn broadcasts(items: Vec<(InterfaceId, Bytes)>) -> impl Iterator<Item = Transmission> {
        items
            .into_iter()
            .map(|(interface, bytes)| Transmission::broadcast(interface, bytes))
    }

    /// Announce the local identity on every online interface.
    ///
    /// Interfaces with an announce budget release it as the budget allows;
    /// whatever is releasable now is returned.
    pub fn announce(&mut self, now: Instant) -> Result<Vec<Transmission>, NodeError> {
        let packet = self.announce_packet()?;
        let immediate = self.engine.queue_local_announce(&packet, &[], now);
        let mut out: Vec<_> = Self::broadcasts(immediate).collect();
        out.extend(Self::broadcasts(self.engine.poll_announces(now)));
        info!(address = %self.address, released = out.len(), "Announcing");
        Ok(out)
    }

    /// Route a locally originated packet
    fn dispatch(&mut self, packet: &Packet, now: Instant) -> Result<Vec<Transmission>, NodeError> {
        let destination = packet.destination();
        self.engine.note_originated(&packet.header, now);
        let bytes = packet.encode();

        if let Some(hop) = self.engine.next_hop_for(&destination, now) {
            debug!(dest = %destination.short(), via = %hop, "Sending");
            return Ok(vec![Transmission::to(&hop, bytes)]);
        }

        let online: Vec<_> = self
            .engine
            .interfaces()
            .map(|i| i.id)
            .filter(|id| self.engine.is_online(*id))
            .collect();
        if self.config.flood_unrouted && !online.is_empty() {
            debug!(dest = %destination.short(), "No route, broadcasting");
            self.stats.flooded += 1;
            return Ok(online
                .into_iter()
                .map(|id| Transmission::broadcast(id, bytes.clone()))
                .collect());
        }

        self.stats.undeliverable += 1;
        self.notifier.notify(NodeEvent::DeliveryFailed {
            destination,
            reason: DropReason::NoRoute,
        });
        Err(NodeError::NoRoute(destination))
    }

    /// Send a single DATA packet
    pub fn send_data(
        &mut self,
        destination: Address,
        payload: Bytes,
        encrypt: bool,
        now: Instant,
    ) -> Result<Vec<Transmission>, NodeError> {
        let (payload, flags) = if encrypt {
            let recipient = self
                .identities
                .lookup(&destination)
                .ok_or(NodeError::UnknownIdentity(destination))?;
            let sealed = self.crypto.encrypt(recipient, &payload)?;
            (Bytes::from(sealed), Flags::ENCRYPTED)
        } else {
            (payload, Flags::empty())
        };
        let packet = self.build(
            PacketType::Data,
            destination,
            flags,
            payload,
            self.config.sign_data,
        )?;
        self.dispatch(&packet, now)
    }

    /// Ask `destination` to announce itself
    pub fn request_path(
        &mut self,
        destination: Address,
        now: Instant,
    ) -> Result<Vec<Transmission>, NodeError> {
        let packet = self.build(
            PacketType::PathRequest,
            destination,
            Flags::empty(),
            Bytes::copy_from_slice(self.address.as_bytes()),
            self.config.sign_data,
        )?;
        self.dispatch(&packet, now)
    }

    /// Start a fragmented transfer of raw data; fragments leave on [`tick`](Self::tick)
    pub fn send_transfer(
        &mut self,
        destination: Address,
        data: Bytes,
        now: Instant,
    ) -> Result<TransferId, NodeError> {
        Ok(self.transfers.send(destination, data, now)?)
    }

    /// Start a file transfer: `metadata` header followed by `data`
    pub fn send_file(
        &mut self,
        destination: Address,
        metadata: &FileMetadata,
        data: &[u8],
        now: Instant,
    ) -> Result<TransferId, NodeError> {
        let wrapped = metadata.wrap(data)?;
        let id = self.transfers.send(destination, wrapped, now)?;
        info!(
            transfer = %id,
            dest = %destination.short(),
            filename = %metadata.filename,
            bytes = data.len(),
            "Sending file"
        );
        Ok(id)
    }

    /// Fragments a file of `size` bytes under `metadata` will need
    pub fn fragments_for_file(&self, metadata: &FileMetadata, size: usize) -> usize {
        self.transfers.fragments_for(metadata.encoded_len() + size)
    }

    /// Open a streaming transfer, optionally starting with a file header
    pub fn open_stream(
        &mut self,
        destination: Address,
        metadata: Option<&FileMetadata>,
        now: Instant,
    ) -> Result<TransferId, NodeError> {
        let id = self.transfers.open_stream(destination, now)?;
        if let Some(metadata) = metadata {
            let header = metadata.wrap(&[])?;
            if let Err(e) = self.transfers.append(&id, &header, now) {
                self.transfers.cancel(&id);
                return Err(e.into());
            }
        }
        Ok(id)
    }

    /// Append to an open stream
    pub fn append_stream(
        &mut self,
        id: &TransferId,
        data: &[u8],
        now: Instant,
    ) -> Result<usize, NodeError> {
        Ok(self.transfers.append(id, data, now)?)
    }

    /// Finish an open stream, returning its fragment count
    pub fn finish_stream(&mut self, id: &TransferId, now: Instant) -> Result<usize, NodeError> {
        Ok(self.transfers.finish(id, now)?)
    }

    /// Cancel a transfer in either direction
    pub fn cancel_transfer(&mut self, id: &TransferId) -> bool {
        let cancelled = self.transfers.cancel(id);
        if cancelled {
            self.notifier
                .notify(NodeEvent::TransferCancelled { transfer_id: *id });
        }
        cancelled
    }

    /// Process one frame received from a link
    pub fn handle_receive(
        &mut self,
        bytes: Bytes,
        arrival: &Arrival,
        now: Instant,
    ) -> Vec<Transmission> {
        self.stats.packets_received += 1;
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!(interface = %arrival.interface, error = %e, "Dropping undecodable packet");
                return Vec::new();
            }
        };

        if packet.packet_type() == PacketType::Announce {
            return self.receive_announce(&packet, arrival, now);
        }

        match self.engine.decide(&packet.header, arrival, now) {
            RoutingDecision::DeliverLocal => self.deliver_local(packet, now),
            RoutingDecision::Forward(hop) => {
                vec![Transmission::to(&hop, packet.forwarded().encode())]
            }
            RoutingDecision::Drop(_) => Vec::new(),
        }
    }

    fn receive_announce(
        &mut self,
        packet: &Packet,
        arrival: &Arrival,
        now: Instant,
    ) -> Vec<Transmission> {
        let Some(signature) = packet.signature else {
            self.stats.bad_signatures += 1;
            warn!(dest = %packet.destination().short(), "Dropping unsigned announce");
            return Vec::new();
        };
        // A payload that is not an identity is left to the engine to reject
        if let Ok(claimed) = PublicIdentity::from_bytes(&packet.payload) {
            if !self
                .crypto
                .verify(&claimed, &packet.signing_input(), &signature)
            {
                self.stats.bad_signatures += 1;
                warn!(dest = %packet.destination().short(), "Dropping announce with bad signature");
                return Vec::new();
            }
        }

        let outcome = match self.engine.handle_announce(packet, arrival, now) {
            Ok(outcome) => outcome,
            Err(_) => return Vec::new(),
        };

        let address = packet.destination();
        let metadata = IdentityMetadata {
            interface: arrival.interface.0,
            rssi: arrival.rssi,
            hop_count: outcome.hop_count,
        };
        match self
            .identities
            .observe(address, outcome.identity, metadata, now)
        {
            Ok(Observation::New) => {
                info!(peer = %address.short(), hops = outcome.hop_count, "Discovered peer");
                self.notifier.notify(NodeEvent::PeerDiscovered {
                    address,
                    identity: outcome.identity,
                    hop_count: outcome.hop_count,
                    interface: arrival.interface,
                });
            }
            Ok(Observation::KeysChanged) => {
                warn!(peer = %address.short(), "Peer announced new encryption key");
            }
            Ok(Observation::Refreshed) => {}
            Err(e) => warn!(peer = %address.short(), error = %e, "Identity not cached"),
        }

        if outcome.update.changed() {
            if let Some(route) = self.engine.routes().lookup(&address, now) {
                self.notifier.notify(NodeEvent::RouteChanged {
                    destination: address,
                    next_hop: route.next_hop.clone(),
                    hop_count: route.hop_count,
                });
            }
        }

        Self::broadcasts(self.engine.poll_announces(now)).collect()
    }

    fn deliver_local(&mut self, packet: Packet, now: Instant) -> Vec<Transmission> {
        match packet.packet_type() {
            PacketType::Data => self.receive_data(packet, now),
            PacketType::Ack => {
                self.receive_ack(&packet, now);
                Vec::new()
            }
            PacketType::PathRequest => {
                self.stats.path_requests += 1;
                debug!("Path request for local address, announcing");
                self.announce(now).unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to answer path request");
                    Vec::new()
                })
            }
            PacketType::PathResponse => {
                self.stats.path_responses += 1;
                Vec::new()
            }
            PacketType::Keepalive => {
                self.stats.keepalives += 1;
                Vec::new()
            }
            PacketType::Announce => Vec::new(),
        }
    }

    /// Find the cached identity whose key produced the packet's signature
    fn authenticate(&mut self, packet: &Packet) -> Option<Address> {
        let signature = packet.signature?;
        let input = packet.signing_input();
        let crypto = &self.crypto;
        let source = self
            .identities
            .find_signer(|identity| crypto.verify(identity, &input, &signature));
        if source.is_none() {
            self.stats.unauthenticated += 1;
            debug!("Signed packet from unknown signer");
        }
        source
    }

    fn receive_data(&mut self, packet: Packet, now: Instant) -> Vec<Transmission> {
        let source = self.authenticate(&packet);
        let flags = packet.header.flags;
        let encrypted = flags.contains(Flags::ENCRYPTED);

        let payload = if encrypted {
            match self.crypto.decrypt(&packet.payload) {
                Ok(plain) => Bytes::from(plain),
                Err(e) => {
                    self.stats.decrypt_failures += 1;
                    warn!(error = %e, "Dropping undecryptable payload");
                    return Vec::new();
                }
            }
        } else {
            packet.payload
        };

        if flags.contains(Flags::FRAGMENTED) {
            return self.receive_fragment(payload, source, now);
        }

        self.notifier.notify(NodeEvent::DataReceived {
            source,
            payload,
            hop_count: packet.header.hop_count,
            encrypted,
        });
        Vec::new()
    }

    fn receive_fragment(
        &mut self,
        payload: Bytes,
        source: Option<Address>,
        now: Instant,
    ) -> Vec<Transmission> {
        let fragment = match Fragment::decode(payload) {
            Ok(fragment) => fragment,
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!(error = %e, "Dropping malformed fragment");
                return Vec::new();
            }
        };
        let ack = FragmentAck {
            transfer_id: fragment.transfer_id,
            index: fragment.index,
        };

        let stored = match self.transfers.handle_fragment(fragment, source, now) {
            Ok(Some(event)) => {
                self.publish(event);
                true
            }
            Ok(None) => true,
            Err(TransferError::IncompleteTransfer {
                transfer_id,
                missing,
                received,
            }) => {
                warn!(
                    transfer = %transfer_id,
                    received,
                    missing = ?missing,
                    "Final fragment arrived with gaps"
                );
                let total = self
                    .transfers
                    .inbound(&transfer_id)
                    .and_then(|t| t.expected());
                self.notifier.notify(NodeEvent::TransferProgress {
                    transfer_id,
                    direction: Direction::Inbound,
                    done: received,
                    total,
                });
                true
            }
            Err(error) => {
                self.notifier.notify(NodeEvent::TransferFailed {
                    transfer_id: ack.transfer_id,
                    direction: Direction::Inbound,
                    error,
                });
                false
            }
        };

        match source {
            Some(sender) if stored => self.send_ack(sender, ack, now),
            _ => Vec::new(),
        }
    }

    fn send_ack(
        &mut self,
        destination: Address,
        ack: FragmentAck,
        now: Instant,
    ) -> Vec<Transmission> {
        let packet = match self.build(
            PacketType::Ack,
            destination,
            Flags::empty(),
            ack.encode(),
            self.config.sign_data,
        ) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "Failed to build ack");
                return Vec::new();
            }
        };
        match self.dispatch(&packet, now) {
            Ok(out) => {
                self.stats.acks_sent += 1;
                out
            }
            Err(_) => Vec::new(),
        }
    }

    fn receive_ack(&mut self, packet: &Packet, now: Instant) {
        let ack = match FragmentAck::decode(&packet.payload) {
            Ok(ack) => ack,
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!(error = %e, "Dropping malformed ack");
                return;
            }
        };
        self.stats.acks_received += 1;
        if let Some(event) = self.transfers.acknowledge(&ack.transfer_id, ack.index, now) {
            self.publish(event);
        }
    }

    fn publish(&self, event: TransferEvent) {
        let event = match event {
            TransferEvent::Progress {
                transfer_id,
                direction,
                done,
                total,
            } => NodeEvent::TransferProgress {
                transfer_id,
                direction,
                done,
                total,
            },
            TransferEvent::Received {
                transfer_id,
                source,
                data,
            } => {
                let (metadata, data) = match FileMetadata::parse(data.clone()) {
                    Ok((metadata, body)) => (Some(metadata), body),
                    Err(_) => (None, data),
                };
                NodeEvent::FileReceived {
                    transfer_id,
                    source,
                    metadata,
                    data,
                }
            }
            TransferEvent::Sent {
                transfer_id,
                destination,
            } => NodeEvent::TransferSent {
                transfer_id,
                destination,
            },
            TransferEvent::Failed {
                transfer_id,
                direction,
                error,
            } => NodeEvent::TransferFailed {
                transfer_id,
                direction,
                error,
            },
        };
        self.notifier.notify(event);
    }

    fn fragment_transmissions(
        &mut self,
        outgoing: OutgoingFragment,
        now: Instant,
    ) -> Result<Vec<Transmission>, NodeError> {
        let payload = outgoing.fragment.encode()?;
        let packet = self.build(
            PacketType::Data,
            outgoing.destination,
            Flags::FRAGMENTED,
            payload,
            true,
        )?;
        self.dispatch(&packet, now)
    }

    /// Periodic work: announces, announce budgets, fragment (re)transmission,
    /// transfer timeouts, route and identity expiry.
    pub fn tick(&mut self, now: Instant) -> Vec<Transmission> {
        let mut out = Vec::new();

        let due = self.engine.due_announces(now);
        if !due.is_empty() {
            match self.announce_packet() {
                Ok(packet) => {
                    let immediate = self.engine.queue_local_announce(&packet, &due, now);
                    out.extend(Self::broadcasts(immediate));
                }
                Err(e) => warn!(error = %e, "Failed to build announce"),
            }
        }
        out.extend(Self::broadcasts(self.engine.poll_announces(now)));

        let (fragments, events) = self.transfers.poll(now);
        for outgoing in fragments {
            let transfer = outgoing.fragment.transfer_id;
            match self.fragment_transmissions(outgoing, now) {
                Ok(tx) => out.extend(tx),
                Err(e) => debug!(%transfer, error = %e, "Fragment not sent"),
            }
        }
        for event in events.into_iter().chain(self.transfers.expire(now)) {
            self.publish(event);
        }

        for route in self.engine.sweep(now) {
            debug!(dest = %route.destination.short(), "Route expired");
            self.notifier.notify(NodeEvent::RouteExpired {
                destination: route.destination,
            });
        }
        self.identities.evict_stale(now);

        out
    }
}
