//! In-memory storage backend for development and testing

use crate::{IdentityBlob, IdentityStore, StorageError};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory identity store
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    blob: RwLock<Option<IdentityBlob>>,
}

impl MemoryIdentityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with `blob`
    pub fn with_blob(blob: IdentityBlob) -> Self {
        Self {
            blob: RwLock::new(Some(blob)),
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn load(&self) -> Result<Option<IdentityBlob>, StorageError> {
        Ok(self.blob.read().await.clone())
    }

    async fn save(&self, blob: &IdentityBlob) -> Result<(), StorageError> {
        debug!("identity stored in memory");
        *self.blob.write().await = Some(blob.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryIdentityStore::new();
        assert!(store.load().await.unwrap().is_none());

        let blob = IdentityBlob([9u8; 64]);
        store.save(&blob).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(blob.clone()));

        let preloaded = MemoryIdentityStore::with_blob(blob.clone());
        assert_eq!(preloaded.load_or_create().await.unwrap(), blob);
    }
}
