//! Payload reference carried as anchor transaction input

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ChainError;

/// What gets written on-chain. Never contains plaintext or key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadRef {
    pub job_id: Uuid,
    /// SHA-256 of the ciphertext
    pub content_hash: String,
    pub location: String,
    pub key_id: String,
    pub algorithm: String,
}

impl PayloadRef {
    pub fn to_bytes(&self) -> Vec<u8> {
        // A struct of strings and a UUID always serializes
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        serde_json::from_slice(bytes).map_err(|e| ChainError::Payload(e.to_string()))
    }
}
