//! Object storage for uploads, converted artifacts and encrypted payloads
//!
//! Layout:
//!
//! ```text
//! uploads/{job_id}/{file_name}   raw upload
//! artifacts/{job_id}.json        converted JSON
//! payloads/{job_id}.bin          nonce || ciphertext
//! ```

pub mod config;
pub mod local;
pub mod s3;

use anyhow::{Context, Result};
use chainvault_convert::Spool;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use self::config::{StorageBackendKind, StorageConfig};
pub use self::local::LocalStore;
pub use self::s3::S3Store;

pub fn upload_key(job_id: Uuid, file_name: &str) -> String {
    format!("uploads/{}/{}", job_id, sanitize_file_name(file_name))
}

pub fn artifact_key(job_id: Uuid) -> String {
    format!("artifacts/{}.json", job_id)
}

pub fn payload_key(job_id: Uuid) -> String {
    format!("payloads/{}.bin", job_id)
}

/// Last path component of a client-supplied name with unsafe characters replaced
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone)]
pub enum ArtifactStore {
    Local(LocalStore),
    S3(S3Store),
}

impl ArtifactStore {
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackendKind::Local => Ok(Self::Local(LocalStore::open(&config.local_dir).await?)),
            StorageBackendKind::S3 => Ok(Self::S3(S3Store::new(&config.s3))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::S3(_) => "s3",
        }
    }

    /// Store the contents of `spool` under `key`, returning the byte count
    pub async fn put_spool(&self, key: &str, spool: Spool, content_type: &str) -> Result<u64> {
        match self {
            Self::Local(store) => {
                let reader = spool.into_reader().context("Failed to rewind spool")?;
                store.put_reader(key, reader).await
            },
            Self::S3(store) => {
                let data = tokio::task::spawn_blocking(move || spool.into_bytes())
                    .await
                    .context("Spool read task panicked")?
                    .context("Failed to read spool")?;
                let len = data.len() as u64;
                store.put(key, data, content_type).await?;
                Ok(len)
            },
        }
    }

    pub async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<u64> {
        let len = data.len() as u64;
        match self {
            Self::Local(store) => store.put_reader(key, Box::new(Cursor::new(data))).await,
            Self::S3(store) => store.put(key, data, content_type).await.map(|_| len),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        match self {
            Self::Local(store) => store.get(key).await,
            Self::S3(store) => store.get(key).await,
        }
    }

    /// Blocking reader for the parser; S3 objects are buffered first
    pub async fn open_reader(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        match self {
            Self::Local(store) => store.open_reader(key),
            Self::S3(store) => Ok(Box::new(Cursor::new(store.get(key).await?))),
        }
    }

    /// Delete `key`; a missing object is not an error
    pub async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Self::Local(store) => store.delete(key).await.map(|_| ()),
            Self::S3(store) => store.delete(key).await,
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self {
            Self::Local(store) => store.exists(key).await,
            Self::S3(store) => store.exists(key).await,
        }
    }

    /// Filesystem path of `key` when stored locally
    pub fn local_path(&self, key: &str) -> Option<PathBuf> {
        match self {
            Self::Local(store) => store.path_for(key).ok(),
            Self::S3(_) => None,
        }
    }

    /// Direct download URL for backends that can hand one out
    pub async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<Option<String>> {
        match self {
            Self::Local(_) => Ok(None),
            Self::S3(store) => store.presigned_url(key, expires_in).await.map(Some),
        }
    }
}
