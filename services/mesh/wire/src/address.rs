//! Node addresses and the public identity carried by announces.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::WireError;

/// Address length in bytes
pub const ADDRESS_SIZE: usize = 16;

/// Size of a public key component
pub const KEY_SIZE: usize = 32;

/// Announce payload size (signing key followed by encryption key)
pub const PUBLIC_IDENTITY_SIZE: usize = 2 * KEY_SIZE;

/// 128-bit node address, the first 16 bytes of SHA-256 over the signing public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    /// All-zero address, used where a sender is unknown
    pub const UNKNOWN: Address = Address([0u8; ADDRESS_SIZE]);

    /// Derive an address from a signing public key
    pub fn from_public_key(signing_key: &[u8]) -> Self {
        let digest: [u8; 32] = Sha256::digest(signing_key).into();
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&digest[..ADDRESS_SIZE]);
        Address(bytes)
    }

    /// Build from a slice that must be exactly 16 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
        let arr: [u8; ADDRESS_SIZE] = bytes.try_into().map_err(|_| WireError::Truncated {
            need: ADDRESS_SIZE,
            have: bytes.len(),
        })?;
        Ok(Address(arr))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Short form for logs (first 4 bytes)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

impl FromStr for Address {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|_| WireError::Malformed("address hex"))?;
        Address::from_slice(&bytes)
    }
}

/// Public key material announced by a node.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    /// Ed25519 verifying key
    pub signing_key: [u8; KEY_SIZE],
    /// X25519 public key
    pub encryption_key: [u8; KEY_SIZE],
}

impl PublicIdentity {
    /// Create from the two key halves
    pub fn new(signing_key: [u8; KEY_SIZE], encryption_key: [u8; KEY_SIZE]) -> Self {
        Self {
            signing_key,
            encryption_key,
        }
    }

    /// Address derived from the signing key
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.signing_key)
    }

    /// Serialize as the 64-byte announce payload
    pub fn to_bytes(&self) -> [u8; PUBLIC_IDENTITY_SIZE] {
        let mut out = [0u8; PUBLIC_IDENTITY_SIZE];
        out[..KEY_SIZE].copy_from_slice(&self.signing_key);
        out[KEY_SIZE..].copy_from_slice(&self.encryption_key);
        out
    }

    /// Parse the leading 64 bytes of an announce payload.
    /// Trailing bytes (application data) are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < PUBLIC_IDENTITY_SIZE {
            return Err(WireError::Truncated {
                need: PUBLIC_IDENTITY_SIZE,
                have: bytes.len(),
            });
        }
        let mut signing_key = [0u8; KEY_SIZE];
        let mut encryption_key = [0u8; KEY_SIZE];
        signing_key.copy_from_slice(&bytes[..KEY_SIZE]);
        encryption_key.copy_from_slice(&bytes[KEY_SIZE..PUBLIC_IDENTITY_SIZE]);
        Ok(Self::new(signing_key, encryption_key))
    }
}

impl fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicIdentity")
            .field("address", &self.address())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_truncated_sha256() {
        let key = [7u8; 32];
        let addr = Address::from_public_key(&key);
        let digest = Sha256::digest(key);
        assert_eq!(&addr.0[..], &digest[..16]);
    }

    #[test]
    fn test_address_hex_roundtrip() {
        let addr = Address([0xAB; 16]);
        let text = addr.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(text.parse::<Address>().unwrap(), addr);
        assert!("abcd".parse::<Address>().is_err());
        assert!("zz".parse::<Address>().is_err());
    }

    #[test]
    fn test_public_identity_bytes() {
        let identity = PublicIdentity::new([1u8; 32], [2u8; 32]);
        let mut payload = identity.to_bytes().to_vec();
        payload.extend_from_slice(b"app data");

        let parsed = PublicIdentity::from_bytes(&payload).unwrap();
        assert_eq!(parsed, identity);
        assert_eq!(parsed.address(), Address::from_public_key(&[1u8; 32]));

        assert!(PublicIdentity::from_bytes(&payload[..63]).is_err());
    }
}
