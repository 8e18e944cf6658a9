//! Ed25519 signatures and X25519 + ChaCha20-Poly1305 payload encryption.
//!
//! Encrypted payload layout:
//!
//! ```text
//! +-------------------+-----------+--------------------------+
//! | ephemeral pk (32) | nonce(12) | ciphertext + tag (16)    |
//! +-------------------+-----------+--------------------------+
//! ```
//!
//! The key is SHA-256 over a context label, the X25519 shared secret, the
//! ephemeral public key and the recipient public key.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use mesh_node::{CryptoError, CryptoProvider, Signature};
use mesh_storage::IdentityBlob;
use mesh_wire::PublicIdentity;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

const KEY_CONTEXT: &[u8] = b"hypha-payload-v1";
const EPHEMERAL_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Crypto provider backed by the node's persisted key material
pub struct DalekCrypto {
    signing: SigningKey,
    encryption: StaticSecret,
    identity: PublicIdentity,
}

impl DalekCrypto {
    /// Derive both key pairs from the identity blob
    pub fn from_blob(blob: &IdentityBlob) -> Self {
        let signing = SigningKey::from_bytes(&blob.signing_seed());
        let encryption = StaticSecret::from(blob.encryption_secret());
        let identity = PublicIdentity::new(
            signing.verifying_key().to_bytes(),
            X25519PublicKey::from(&encryption).to_bytes(),
        );
        Self {
            signing,
            encryption,
            identity,
        }
    }
}

fn payload_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(KEY_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral);
    hasher.update(recipient);
    hasher.finalize().into()
}

impl CryptoProvider for DalekCrypto {
    fn identity(&self) -> PublicIdentity {
        self.identity
    }

    fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message).to_bytes()
    }

    fn verify(&self, signer: &PublicIdentity, message: &[u8], signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&signer.signing_key) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(signature);
        key.verify(message, &signature).is_ok()
    }

    fn encrypt(&self, recipient: &PublicIdentity, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = X25519PublicKey::from(&ephemeral).to_bytes();
        let shared = ephemeral
            .diffie_hellman(&X25519PublicKey::from(recipient.encryption_key))
            .to_bytes();
        let key = payload_key(&shared, &ephemeral_public, &recipient.encryption_key);

        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut out = Vec::with_capacity(EPHEMERAL_LEN + NONCE_LEN + sealed.len());
        out.extend_from_slice(&ephemeral_public);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < EPHEMERAL_LEN + NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (ephemeral, rest) = ciphertext.split_at(EPHEMERAL_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);
        let mut ephemeral_public = [0u8; EPHEMERAL_LEN];
        ephemeral_public.copy_from_slice(ephemeral);

        let shared = self
            .encryption
            .diffie_hellman(&X25519PublicKey::from(ephemeral_public))
            .to_bytes();
        let key = payload_key(&shared, &ephemeral_public, &self.identity.encryption_key);
        let cipher =
            ChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::Decrypt)?;
        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto(seed: u8) -> DalekCrypto {
        DalekCrypto::from_blob(&IdentityBlob([seed; 64]))
    }

    #[test]
    fn test_sign_verify() {
        let alice = crypto(1);
        let bob = crypto(2);
        let sig = alice.sign(b"announce");
        assert!(bob.verify(&alice.identity(), b"announce", &sig));
        assert!(!bob.verify(&alice.identity(), b"announcE", &sig));
        assert!(!bob.verify(&bob.identity(), b"announce", &sig));
    }

    #[test]
    fn test_identity_is_stable_per_blob() {
        let mut raw = [1u8; 64];
        let a = DalekCrypto::from_blob(&IdentityBlob(raw));
        assert_eq!(a.identity(), crypto(1).identity());

        // a new encryption secret keeps the address
        raw[40] = 9;
        let b = DalekCrypto::from_blob(&IdentityBlob(raw));
        assert_eq!(a.identity().address(), b.identity().address());
        assert_ne!(a.identity().encryption_key, b.identity().encryption_key);
    }

    #[test]
    fn test_encrypt_for_recipient_only() {
        let alice = crypto(1);
        let bob = crypto(2);
        let carol = crypto(3);

        let sealed = alice.encrypt(&bob.identity(), b"meet at dawn").unwrap();
        assert_eq!(sealed.len(), 32 + 12 + 12 + 16);
        assert_eq!(bob.decrypt(&sealed).unwrap(), b"meet at dawn");
        assert_eq!(carol.decrypt(&sealed), Err(CryptoError::Decrypt));

        let mut tampered = sealed.clone();
        tampered[50] ^= 1;
        assert_eq!(bob.decrypt(&tampered), Err(CryptoError::Decrypt));
        assert_eq!(bob.decrypt(&sealed[..40]), Err(CryptoError::Decrypt));
    }
}
