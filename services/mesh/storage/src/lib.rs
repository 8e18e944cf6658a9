//! Bounded state storage for the hypha mesh.
//!
//! This crate provides the fixed-capacity containers the rest of the stack keeps
//! its tables in, the address-to-identity cache, and persistence of the node's
//! own identity blob with pluggable backends (in-memory, file-based).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod backend;
pub mod cache;

use async_trait::async_trait;
use mesh_wire::Address;
use rand::RngCore;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Size of the persisted identity secret material
pub const IDENTITY_BLOB_SIZE: usize = 64;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Identity keys do not hash to the claimed address
    #[error("Address mismatch: claimed {claimed}, keys derive {derived}")]
    AddressMismatch {
        /// Address the caller supplied
        claimed: Address,
        /// Address derived from the signing key
        derived: Address,
    },
    /// Invalid operation
    #[error("Invalid operation: {0}")]
    Invalid(String),
}

/// The node's secret key material: Ed25519 signing seed followed by the X25519
/// static secret. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityBlob(pub [u8; IDENTITY_BLOB_SIZE]);

impl IdentityBlob {
    /// Generate fresh key material
    pub fn generate<R: RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; IDENTITY_BLOB_SIZE];
        rng.fill_bytes(&mut bytes);
        IdentityBlob(bytes)
    }

    /// Ed25519 signing seed
    pub fn signing_seed(&self) -> [u8; 32] {
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&self.0[..32]);
        seed
    }

    /// X25519 static secret
    pub fn encryption_secret(&self) -> [u8; 32] {
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&self.0[32..]);
        secret
    }
}

impl fmt::Debug for IdentityBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityBlob(..)")
    }
}

/// Persistence for the node's identity blob
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Load the stored blob, if one exists
    async fn load(&self) -> Result<Option<IdentityBlob>, StorageError>;

    /// Store `blob`, replacing any previous one
    async fn save(&self, blob: &IdentityBlob) -> Result<(), StorageError>;

    /// Load the stored blob or create, save and return a fresh one
    async fn load_or_create(&self) -> Result<IdentityBlob, StorageError> {
        if let Some(blob) = self.load().await? {
            return Ok(blob);
        }
        let blob = IdentityBlob::generate(&mut rand::rngs::OsRng);
        self.save(&blob).await?;
        tracing::info!("generated new node identity");
        Ok(blob)
    }
}

/// Storage backend configuration
#[derive(Clone, Debug, Default)]
pub enum StorageMode {
    /// In-memory storage (dev/tests only); a new identity every start
    #[default]
    InMemory,
    /// Single file holding the identity blob
    File {
        /// Path of the identity file
        path: PathBuf,
    },
}

// Re-export main types
pub use arena::LruArena;
pub use backend::file::FileIdentityStore;
pub use backend::mem::MemoryIdentityStore;
pub use cache::{
    CachedIdentity, IdentityCache, IdentityCacheConfig, IdentityMetadata, Observation,
    DEFAULT_IDENTITY_CAPACITY, DEFAULT_STALE_HORIZON,
};

/// Create an identity store from configuration
pub fn identity_store(mode: StorageMode) -> Box<dyn IdentityStore> {
    match mode {
        StorageMode::InMemory => Box::new(MemoryIdentityStore::new()),
        StorageMode::File { path } => Box::new(FileIdentityStore::new(path)),
    }
}
