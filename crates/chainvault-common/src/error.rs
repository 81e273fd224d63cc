//! Error types shared across ChainVault crates

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors raised by the shared utilities
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unknown source format: {0}")]
    UnknownFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
