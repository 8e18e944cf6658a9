//! Cryptographic capability consumed by the node.
//!
//! The node never links a crypto library itself. Signing, verification and
//! payload encryption are provided by an implementation of
//! [`CryptoProvider`] chosen by the embedding program.

use mesh_wire::{PublicIdentity, SIGNATURE_SIZE};
use thiserror::Error;

/// Detached signature
pub type Signature = [u8; SIGNATURE_SIZE];

/// Crypto failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext was malformed or failed authentication
    #[error("Decryption failed")]
    Decrypt,

    /// Encryption could not be performed
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    /// Key material was rejected
    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

/// Signing and encryption for the local identity
pub trait CryptoProvider: Send + Sync {
    /// Public half of the local identity
    fn identity(&self) -> PublicIdentity;

    /// Sign `message` with the local signing key
    fn sign(&self, message: &[u8]) -> Signature;

    /// Check `signature` over `message` against `signer`'s signing key
    fn verify(&self, signer: &PublicIdentity, message: &[u8], signature: &Signature) -> bool;

    /// Encrypt `plaintext` so only `recipient` can read it
    fn encrypt(&self, recipient: &PublicIdentity, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt a payload addressed to the local identity
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}
