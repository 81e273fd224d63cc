//! Data key storage
//!
//! Keys are never exposed outside the encryption layer. The file-backed store
//! wraps every data key under a master key before it touches disk.

use aes_gcm::Aes256Gcm;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use super::{open_with, seal_with, CryptoError, KeyNotFoundError};

#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn put(&self, key_id: &str, key: &[u8]) -> Result<(), CryptoError>;

    async fn get(&self, key_id: &str) -> Result<Vec<u8>, CryptoError>;

    /// Returns `false` when the key did not exist
    async fn delete(&self, key_id: &str) -> Result<bool, CryptoError>;
}

/// Process-local key store for tests and throwaway deployments
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn put(&self, key_id: &str, key: &[u8]) -> Result<(), CryptoError> {
        self.keys.write().await.insert(key_id.to_string(), key.to_vec());
        Ok(())
    }

    async fn get(&self, key_id: &str) -> Result<Vec<u8>, CryptoError> {
        self.keys
            .read()
            .await
            .get(key_id)
            .cloned()
            .ok_or_else(|| {
                KeyNotFoundError {
                    key_id: key_id.to_string(),
                }
                .into()
            })
    }

    async fn delete(&self, key_id: &str) -> Result<bool, CryptoError> {
        Ok(self.keys.write().await.remove(key_id).is_some())
    }
}

/// Stores `{dir}/{key_id}.key` as base64 of the wrapped key
pub struct FileKeyStore {
    dir: PathBuf,
    master_key: [u8; 32],
}

impl FileKeyStore {
    pub async fn open(dir: impl Into<PathBuf>, master_key: [u8; 32]) -> Result<Self, CryptoError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir, master_key })
    }

    /// Decode a hex master key as given in configuration
    pub fn decode_master_key(encoded: &str) -> Result<[u8; 32], CryptoError> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("master key is not hex: {}", e)))?;
        bytes.try_into().map_err(|bytes: Vec<u8>| {
            CryptoError::InvalidKey(format!("master key must be 32 bytes, got {}", bytes.len()))
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key_id: &str) -> Result<PathBuf, CryptoError> {
        if key_id.is_empty()
            || !key_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CryptoError::InvalidKey(format!("invalid key id '{}'", key_id)));
        }
        Ok(self.dir.join(format!("{}.key", key_id)))
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn put(&self, key_id: &str, key: &[u8]) -> Result<(), CryptoError> {
        let path = self.path_for(key_id)?;
        let wrapped = seal_with::<Aes256Gcm>(&self.master_key, key_id.as_bytes(), key.to_vec())?;

        // Write then rename so a crash never leaves a half-written key
        let tmp = path.with_extension("key.tmp");
        tokio::fs::write(&tmp, BASE64.encode(wrapped)).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key_id, "Stored wrapped data key");
        Ok(())
    }

    async fn get(&self, key_id: &str) -> Result<Vec<u8>, CryptoError> {
        let path = self.path_for(key_id)?;
        let encoded = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeyNotFoundError {
                    key_id: key_id.to_string(),
                }
                .into())
            },
            Err(e) => return Err(e.into()),
        };
        let wrapped = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("stored key is not base64: {}", e)))?;
        open_with::<Aes256Gcm>(&self.master_key, key_id.as_bytes(), wrapped)
    }

    async fn delete(&self, key_id: &str) -> Result<bool, CryptoError> {
        let path = self.path_for(key_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path(), [7u8; 32]).await.unwrap();

        store.put("key-1", &[1, 2, 3, 4]).await.unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("key-1.key")).unwrap();
        assert!(!on_disk.contains("AQIDBA"), "key must not be stored in the clear");

        assert_eq!(store.get("key-1").await.unwrap(), vec![1, 2, 3, 4]);
        assert!(store.delete("key-1").await.unwrap());
        assert!(!store.delete("key-1").await.unwrap());
        assert!(matches!(
            store.get("key-1").await,
            Err(CryptoError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_master_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path(), [7u8; 32]).await.unwrap();
        store.put("key-1", &[9; 16]).await.unwrap();

        let other = FileKeyStore::open(dir.path(), [8u8; 32]).await.unwrap();
        assert!(matches!(other.get("key-1").await, Err(CryptoError::Tampered)));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path(), [0u8; 32]).await.unwrap();
        assert!(matches!(
            store.put("../escape", &[1]).await,
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_decode_master_key() {
        let encoded = hex::encode([3u8; 32]);
        assert_eq!(FileKeyStore::decode_master_key(&encoded).unwrap(), [3u8; 32]);
        assert!(FileKeyStore::decode_master_key(&hex::encode([3u8; 16])).is_err());
        assert!(FileKeyStore::decode_master_key("zz").is_err());
    }
}
