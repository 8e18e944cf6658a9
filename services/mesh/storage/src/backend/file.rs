//! File-based identity storage with checksum verification.
//!
//! The file holds a single record:
//!
//! ```text
//! +--------------+---------+----------------+-------------------+
//! | magic "HYID" | version | blob (64 B)    | crc32 (LE)        |
//! +--------------+---------+----------------+-------------------+
//! ```
//!
//! Writes go to a sibling temporary file that is then renamed over the target.

use crate::{IdentityBlob, IdentityStore, StorageError, IDENTITY_BLOB_SIZE};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc32fast::Hasher;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MAGIC: &[u8; 4] = b"HYID";
const VERSION: u8 = 1;

/// Identity record header and trailer around the blob
#[derive(Debug)]
struct IdentityRecord {
    version: u8,
    blob: [u8; IDENTITY_BLOB_SIZE],
    crc32: u32,
}

impl IdentityRecord {
    const SIZE: usize = 4 + 1 + IDENTITY_BLOB_SIZE + 4;

    fn new(blob: &IdentityBlob) -> Self {
        Self {
            version: VERSION,
            blob: blob.0,
            crc32: Self::compute_crc(VERSION, &blob.0),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(MAGIC);
        buf.put_u8(self.version);
        buf.put_slice(&self.blob);
        buf.put_u32_le(self.crc32);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, StorageError> {
        if buf.remaining() != Self::SIZE {
            return Err(StorageError::Corruption(format!(
                "identity record is {} bytes, expected {}",
                buf.remaining(),
                Self::SIZE
            )));
        }
        let magic = buf.split_to(4);
        if magic.as_ref() != MAGIC {
            return Err(StorageError::Corruption("bad identity magic".to_string()));
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(StorageError::Corruption(format!(
                "unsupported identity version {version}"
            )));
        }
        let mut blob = [0u8; IDENTITY_BLOB_SIZE];
        buf.copy_to_slice(&mut blob);
        let crc32 = buf.get_u32_le();

        let record = Self {
            version,
            blob,
            crc32,
        };
        if record.crc32 != Self::compute_crc(record.version, &record.blob) {
            return Err(StorageError::Corruption(
                "identity checksum mismatch".to_string(),
            ));
        }
        Ok(record)
    }

    fn compute_crc(version: u8, blob: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(MAGIC);
        hasher.update(&[version]);
        hasher.update(blob);
        hasher.finalize()
    }
}

/// Identity store backed by a single file
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    /// Store at `path`; the file is created on first save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the identity file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "identity".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn load(&self) -> Result<Option<IdentityBlob>, StorageError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no identity file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match IdentityRecord::decode(&mut Bytes::from(raw)) {
            Ok(record) => {
                info!("Loaded identity from {}", self.path.display());
                Ok(Some(IdentityBlob(record.blob)))
            }
            Err(e) => {
                warn!("Identity file {} unusable: {}", self.path.display(), e);
                Err(e)
            }
        }
    }

    async fn save(&self, blob: &IdentityBlob) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut buf = BytesMut::with_capacity(IdentityRecord::SIZE);
        IdentityRecord::new(blob).encode(&mut buf);

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &buf).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tokio::fs::rename(&tmp, &self.path).await?;

        info!("Saved identity to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileIdentityStore::new(dir.path().join("keys").join("identity"));

        assert!(store.load().await.unwrap().is_none());

        let blob = IdentityBlob([0x3C; IDENTITY_BLOB_SIZE]);
        store.save(&blob).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(blob.clone()));

        let on_disk = std::fs::read(store.path()).unwrap();
        assert_eq!(on_disk.len(), IdentityRecord::SIZE);
        assert_eq!(&on_disk[..4], b"HYID");
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_file_store_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let store = FileIdentityStore::new(dir.path().join("identity"));
        store.save(&IdentityBlob([1u8; IDENTITY_BLOB_SIZE])).await.unwrap();

        let mut raw = std::fs::read(store.path()).unwrap();
        raw[10] ^= 0xFF;
        std::fs::write(store.path(), &raw).unwrap();
        assert!(matches!(
            store.load().await,
            Err(StorageError::Corruption(_))
        ));

        std::fs::write(store.path(), b"short").unwrap();
        assert!(matches!(
            store.load().await,
            Err(StorageError::Corruption(_))
        ));
    }

    #[tokio::test]
    async fn test_load_or_create_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity");

        let first = FileIdentityStore::new(&path).load_or_create().await.unwrap();
        let second = FileIdentityStore::new(&path).load_or_create().await.unwrap();
        assert_eq!(first, second);
    }
}
