//! Encryption layer
//!
//! Every job gets its own data key. The converted JSON is sealed with
//! AES-GCM, the job ID is bound as associated data and the stored layout is
//! `nonce (12 bytes) || ciphertext || tag`. Sealing and opening work in place
//! on the caller's buffer, so a payload is held in memory once. Keys live in
//! a [`KeyStore`]; this module never writes raw key material anywhere else.

pub mod keystore;

use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce, Tag};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub use keystore::{FileKeyStore, KeyStore, MemoryKeyStore};

use crate::config::{CryptoConfig, KeyStoreKind};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Encryption strength offered to uploaders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionTier {
    /// AES-128-GCM
    Standard,
    /// AES-256-GCM
    #[default]
    High,
}

impl EncryptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionTier::Standard => "standard",
            EncryptionTier::High => "high",
        }
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            EncryptionTier::Standard => "AES-128-GCM",
            EncryptionTier::High => "AES-256-GCM",
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            EncryptionTier::Standard => 16,
            EncryptionTier::High => 32,
        }
    }

    pub fn from_algorithm(algorithm: &str) -> Result<Self, CryptoError> {
        match algorithm {
            "AES-128-GCM" => Ok(EncryptionTier::Standard),
            "AES-256-GCM" => Ok(EncryptionTier::High),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for EncryptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionTier {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "aes-128" | "aes-128-gcm" => Ok(EncryptionTier::Standard),
            "high" | "enhanced" | "aes-256" | "aes-256-gcm" => Ok(EncryptionTier::High),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Encryption key '{key_id}' not found")]
pub struct KeyNotFoundError {
    pub key_id: String,
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    KeyNotFound(#[from] KeyNotFoundError),

    /// Ciphertext is truncated, corrupt, or bound to another job
    #[error("Decryption failed: ciphertext is corrupt or was tampered with")]
    Tampered,

    #[error("Encryption failed: {0}")]
    Seal(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Unsupported encryption algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("Key store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encryption task failed: {0}")]
    Task(String),
}

/// Encrypted payload as produced by [`EncryptionLayer::encrypt`]
#[derive(Clone)]
pub struct EncryptedPayload {
    pub job_id: Uuid,
    pub cipher_text: Vec<u8>,
    pub key_id: String,
    pub tier: EncryptionTier,
}

impl EncryptedPayload {
    pub fn algorithm(&self) -> &'static str {
        self.tier.algorithm()
    }
}

impl fmt::Debug for EncryptedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedPayload")
            .field("job_id", &self.job_id)
            .field("cipher_text_len", &self.cipher_text.len())
            .field("key_id", &self.key_id)
            .field("tier", &self.tier)
            .finish()
    }
}

#[derive(Clone)]
pub struct EncryptionLayer {
    keys: Arc<dyn KeyStore>,
}

impl EncryptionLayer {
    pub fn new(keys: Arc<dyn KeyStore>) -> Self {
        Self { keys }
    }

    /// Open the key store selected in configuration
    pub async fn from_config(config: &CryptoConfig) -> Result<Self, CryptoError> {
        let keys: Arc<dyn KeyStore> = match config.key_store {
            KeyStoreKind::Memory => {
                warn!("Using the in-memory key store, payloads become unreadable after a restart");
                Arc::new(MemoryKeyStore::new())
            },
            KeyStoreKind::File => {
                let encoded = config.master_key.as_deref().ok_or_else(|| {
                    CryptoError::InvalidKey("the file key store needs a master key".to_string())
                })?;
                let master_key = FileKeyStore::decode_master_key(encoded)?;
                Arc::new(FileKeyStore::open(&config.key_dir, master_key).await?)
            },
        };
        Ok(Self::new(keys))
    }

    /// Seal `plaintext` for `job_id` under a freshly generated key
    #[instrument(skip(self, plaintext), fields(bytes = plaintext.len()))]
    pub async fn encrypt(
        &self,
        job_id: Uuid,
        plaintext: Vec<u8>,
        tier: EncryptionTier,
    ) -> Result<EncryptedPayload, CryptoError> {
        let key = generate_key(tier);
        let key_id = format!("key-{}", Uuid::new_v4());
        self.keys.put(&key_id, &key).await?;

        let cipher_text = tokio::task::spawn_blocking(move || seal(tier, &key, job_id, plaintext))
            .await
            .map_err(|e| CryptoError::Task(e.to_string()))??;

        debug!(key_id = %key_id, bytes = cipher_text.len(), "Payload encrypted");
        Ok(EncryptedPayload {
            job_id,
            cipher_text,
            key_id,
            tier,
        })
    }

    #[instrument(skip(self, cipher_text), fields(bytes = cipher_text.len()))]
    pub async fn decrypt(
        &self,
        job_id: Uuid,
        cipher_text: Vec<u8>,
        key_id: &str,
        tier: EncryptionTier,
    ) -> Result<Vec<u8>, CryptoError> {
        let key = self.keys.get(key_id).await?;
        if key.len() != tier.key_len() {
            return Err(CryptoError::InvalidKey(format!(
                "key '{}' is {} bytes, {} needs {}",
                key_id,
                key.len(),
                tier.algorithm(),
                tier.key_len()
            )));
        }

        tokio::task::spawn_blocking(move || open(tier, &key, job_id, cipher_text))
            .await
            .map_err(|e| CryptoError::Task(e.to_string()))?
    }

    /// Destroy the key for a payload, making its ciphertext unreadable
    pub async fn destroy_key(&self, key_id: &str) -> Result<bool, CryptoError> {
        self.keys.delete(key_id).await
    }
}

fn generate_key(tier: EncryptionTier) -> Vec<u8> {
    match tier {
        EncryptionTier::Standard => Aes128Gcm::generate_key(OsRng).to_vec(),
        EncryptionTier::High => Aes256Gcm::generate_key(OsRng).to_vec(),
    }
}

fn seal(tier: EncryptionTier, key: &[u8], job_id: Uuid, plaintext: Vec<u8>) -> Result<Vec<u8>, CryptoError> {
    match tier {
        EncryptionTier::Standard => seal_with::<Aes128Gcm>(key, job_id.as_bytes(), plaintext),
        EncryptionTier::High => seal_with::<Aes256Gcm>(key, job_id.as_bytes(), plaintext),
    }
}

fn open(tier: EncryptionTier, key: &[u8], job_id: Uuid, sealed: Vec<u8>) -> Result<Vec<u8>, CryptoError> {
    match tier {
        EncryptionTier::Standard => open_with::<Aes128Gcm>(key, job_id.as_bytes(), sealed),
        EncryptionTier::High => open_with::<Aes256Gcm>(key, job_id.as_bytes(), sealed),
    }
}

/// Seal `plaintext` into `nonce || ciphertext || tag`, reusing its allocation
pub(crate) fn seal_with<C>(key: &[u8], aad: &[u8], plaintext: Vec<u8>) -> Result<Vec<u8>, CryptoError>
where
    C: AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16> + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let nonce = C::generate_nonce(&mut OsRng);

    let mut sealed = plaintext;
    let len = sealed.len();
    sealed.reserve_exact(NONCE_LEN + TAG_LEN);
    sealed.extend_from_slice(&[0u8; NONCE_LEN]);
    sealed.copy_within(0..len, NONCE_LEN);
    sealed[..NONCE_LEN].copy_from_slice(&nonce);

    let tag = cipher
        .encrypt_in_place_detached(&nonce, aad, &mut sealed[NONCE_LEN..])
        .map_err(|_| CryptoError::Seal("AEAD encryption failed".to_string()))?;
    sealed.extend_from_slice(&tag);
    Ok(sealed)
}

/// Inverse of [`seal_with`]; the plaintext is left in the input buffer
pub(crate) fn open_with<C>(key: &[u8], aad: &[u8], sealed: Vec<u8>) -> Result<Vec<u8>, CryptoError>
where
    C: AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16> + KeyInit,
{
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Tampered);
    }
    let cipher = C::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let mut buffer = sealed;
    let tag_start = buffer.len() - TAG_LEN;
    let tag = Tag::<U16>::clone_from_slice(&buffer[tag_start..]);
    let nonce = Nonce::<U12>::clone_from_slice(&buffer[..NONCE_LEN]);
    cipher
        .decrypt_in_place_detached(&nonce, aad, &mut buffer[NONCE_LEN..tag_start], &tag)
        .map_err(|_| CryptoError::Tampered)?;

    buffer.truncate(tag_start);
    buffer.drain(..NONCE_LEN);
    Ok(buffer)
}
