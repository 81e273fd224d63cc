//! ChainVault Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the ChainVault workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`VaultError`] and the crate [`Result`] alias
//! - **Checksums**: streaming SHA-256/SHA-512 helpers and a hashing writer
//! - **Logging**: centralized `tracing` initialisation shared by every binary
//! - **Types**: source formats and checksum algorithms
//!
//! # Example
//!
//! ```no_run
//! use chainvault_common::checksum::compute_file_checksum;
//! use chainvault_common::types::ChecksumAlgorithm;
//!
//! fn fingerprint(path: &str) -> chainvault_common::Result<String> {
//!     compute_file_checksum(path, ChecksumAlgorithm::Sha256)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{Result, VaultError};
