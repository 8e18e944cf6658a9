//! In-memory radio segment for driving several nodes

#![allow(dead_code)]

use bytes::Bytes;
use mesh_node::{
    Clock, CryptoError, CryptoProvider, EventEnvelope, EventNotifier, ManualClock, Node,
    NodeConfig, NodeEvent, Signature, Transmission,
};
use mesh_routing::{Arrival, InterfaceConfig, InterfaceId, InterfaceMode, LinkPeer};
use mesh_wire::{Address, PublicIdentity};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Keyed-digest imitation of a signature scheme; only distinguishes keys
#[derive(Debug, Clone)]
pub struct SimCrypto {
    signing: [u8; 32],
    encryption: [u8; 32],
}

impl SimCrypto {
    pub fn new(seed: u8) -> Self {
        Self {
            signing: Sha256::digest([b's', seed]).into(),
            encryption: Sha256::digest([b'e', seed]).into(),
        }
    }

    fn keystream(key: &[u8; 32], len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len + 32);
        let mut counter = 0u32;
        while out.len() < len {
            let block = Sha256::new()
                .chain_update(key)
                .chain_update(counter.to_be_bytes())
                .finalize();
            out.extend_from_slice(&block);
            counter += 1;
        }
        out.truncate(len);
        out
    }
}

fn digest_signature(key: &[u8; 32], message: &[u8]) -> Signature {
    let first: [u8; 32] = Sha256::new()
        .chain_update(key)
        .chain_update(message)
        .finalize()
        .into();
    let second: [u8; 32] = Sha256::digest(first).into();
    let mut sig = [0u8; 64];
    sig[..32].copy_from_slice(&first);
    sig[32..].copy_from_slice(&second);
    sig
}

impl CryptoProvider for SimCrypto {
    fn identity(&self) -> PublicIdentity {
        PublicIdentity::new(self.signing, self.encryption)
    }

    fn sign(&self, message: &[u8]) -> Signature {
        digest_signature(&self.signing, message)
    }

    fn verify(&self, signer: &PublicIdentity, message: &[u8], signature: &Signature) -> bool {
        digest_signature(&signer.signing_key, message) == *signature
    }

    fn encrypt(&self, recipient: &PublicIdentity, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let stream = Self::keystream(&recipient.encryption_key, plaintext.len());
        let mut out = recipient.encryption_key.to_vec();
        out.extend(plaintext.iter().zip(stream).map(|(p, k)| p ^ k));
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < 32 || ciphertext[..32] != self.encryption {
            return Err(CryptoError::Decrypt);
        }
        let body = &ciphertext[32..];
        let stream = Self::keystream(&self.encryption, body.len());
        Ok(body.iter().zip(stream).map(|(c, k)| c ^ k).collect())
    }
}

/// One LoRa-style interface on a shared medium
pub fn radio_config(name: &str) -> NodeConfig {
    NodeConfig {
        name: name.to_string(),
        interfaces: vec![InterfaceConfig::new(0, "lora0", InterfaceMode::Full)
            .with_bandwidth(1_000_000)
            .shared()],
        ..NodeConfig::default()
    }
}

pub struct SimNode {
    pub node: Node,
    pub events: UnboundedReceiver<EventEnvelope>,
}

impl SimNode {
    pub fn drain(&mut self) -> Vec<NodeEvent> {
        let mut out = Vec::new();
        while let Ok(envelope) = self.events.try_recv() {
            out.push(envelope.event);
        }
        out
    }

    pub fn address(&self) -> Address {
        self.node.address()
    }
}

/// Nodes on one radio channel; each hears only the neighbours listed in `links`
pub struct Mesh {
    pub clock: ManualClock,
    pub nodes: Vec<SimNode>,
    links: Vec<(usize, usize)>,
    pub delivered: usize,
}

/// Link-layer handle for node `index`
pub fn peer_of(index: usize) -> LinkPeer {
    LinkPeer::from_bytes(&[index as u8 + 1])
}

impl Mesh {
    pub fn new(count: usize) -> Self {
        let clock = ManualClock::new();
        let nodes = (0..count)
            .map(|i| {
                let (notifier, events) = EventNotifier::channel();
                let node = Node::new(
                    radio_config(&format!("node-{i}")),
                    Arc::new(SimCrypto::new(i as u8 + 1)),
                    notifier,
                    clock.now(),
                )
                .unwrap();
                SimNode { node, events }
            })
            .collect();
        Self {
            clock,
            nodes,
            links: Vec::new(),
            delivered: 0,
        }
    }

    /// Line topology 0 - 1 - 2 - ...
    pub fn chain(count: usize) -> Self {
        let mut mesh = Self::new(count);
        for i in 1..count {
            mesh.connect(i - 1, i);
        }
        mesh
    }

    pub fn connect(&mut self, a: usize, b: usize) {
        self.links.push((a, b));
    }

    fn neighbours(&self, of: usize) -> Vec<usize> {
        self.links
            .iter()
            .filter_map(|&(a, b)| match (a == of, b == of) {
                (true, _) => Some(b),
                (_, true) => Some(a),
                _ => None,
            })
            .collect()
    }

    /// Deliver `out` from `from` and everything it provokes
    pub fn pump(&mut self, from: usize, out: Vec<Transmission>) {
        self.pump_filtered(from, out, |_, _, _| true);
    }

    /// Like [`pump`](Self::pump) but `keep(from, to, bytes)` may drop frames
    pub fn pump_filtered(
        &mut self,
        from: usize,
        out: Vec<Transmission>,
        mut keep: impl FnMut(usize, usize, &Bytes) -> bool,
    ) {
        let mut queue: Vec<(usize, Transmission)> = out.into_iter().map(|t| (from, t)).collect();
        let mut steps = 0;
        while let Some((sender, tx)) = queue.pop() {
            steps += 1;
            assert!(steps < 10_000, "transmission storm");
            for to in self.neighbours(sender) {
                if let Some(peer) = &tx.peer {
                    if *peer != peer_of(to) {
                        continue;
                    }
                }
                if !keep(sender, to, &tx.bytes) {
                    continue;
                }
                self.delivered += 1;
                let arrival = Arrival::new(InterfaceId(0), peer_of(sender));
                let now = self.clock.now();
                let replies = self.nodes[to]
                    .node
                    .handle_receive(tx.bytes.clone(), &arrival, now);
                queue.extend(replies.into_iter().map(|t| (to, t)));
            }
        }
    }

    /// Every node announces once
    pub fn announce_all(&mut self) {
        for i in 0..self.nodes.len() {
            let now = self.clock.now();
            let out = self.nodes[i].node.announce(now).unwrap();
            self.pump(i, out);
        }
    }

    /// Tick every node and deliver the results
    pub fn tick_all(&mut self) {
        for i in 0..self.nodes.len() {
            let now = self.clock.now();
            let out = self.nodes[i].node.tick(now);
            self.pump(i, out);
        }
    }
}
