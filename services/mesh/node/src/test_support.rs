//! Deterministic stand-ins shared by unit tests

use mesh_wire::{Address, PublicIdentity};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::{CryptoError, CryptoProvider, EventEnvelope, EventNotifier, Node, NodeConfig, Signature};

/// Keyed-digest imitation of a signature scheme. Not secure; only
/// distinguishes keys.
#[derive(Debug, Clone)]
pub struct TestCrypto {
    signing: [u8; 32],
    encryption: [u8; 32],
}

impl TestCrypto {
    pub fn new(seed: u8) -> Self {
        let signing: [u8; 32] = Sha256::digest([b's', seed]).into();
        let encryption: [u8; 32] = Sha256::digest([b'e', seed]).into();
        Self {
            signing,
            encryption,
        }
    }

    pub fn identity_address(&self) -> Address {
        self.identity().address()
    }

    fn keystream(key: &[u8; 32], len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
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

impl CryptoProvider for TestCrypto {
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

pub fn test_node(seed: u8, config: NodeConfig) -> (Node, mpsc::UnboundedReceiver<EventEnvelope>) {
    test_node_at(seed, config, Instant::now())
}

pub fn test_node_at(
    seed: u8,
    config: NodeConfig,
    now: Instant,
) -> (Node, mpsc::UnboundedReceiver<EventEnvelope>) {
    let (notifier, rx) = EventNotifier::channel();
    let node = Node::new(config, Arc::new(TestCrypto::new(seed)), notifier, now).unwrap();
    (node, rx)
}
