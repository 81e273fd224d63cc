//! Chain adapter errors

use std::time::Duration;
use thiserror::Error;

use super::Network;

/// Failure of a single chain call
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Node returned HTTP {status}")]
    Http { status: u16 },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("Transaction {0} not found")]
    NotFound(String),

    #[error("Transaction input is not a payload reference: {0}")]
    Payload(String),
}

impl ChainError {
    /// Transport failures, timeouts, 429 and 5xx are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::Transport(_) | ChainError::Timeout => true,
            ChainError::Http { status } => *status == 429 || *status >= 500,
            ChainError::Rpc { .. }
            | ChainError::InvalidResponse(_)
            | ChainError::NotFound(_)
            | ChainError::Payload(_) => false,
        }
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChainError::Timeout
        } else if let Some(status) = err.status() {
            ChainError::Http {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            ChainError::InvalidResponse(err.to_string())
        } else {
            ChainError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ChainSubmissionError {
    #[error("{network} rejected the anchor transaction: {reason}")]
    Rejected { network: Network, reason: String },

    #[error("{network} submission failed after {attempts} attempts: {last}")]
    Exhausted {
        network: Network,
        attempts: u32,
        last: String,
    },

    #[error("Submission cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
#[error("Transaction {tx_hash} on {network} not confirmed after {}s", waited.as_secs())]
pub struct ChainTimeoutError {
    pub network: Network,
    pub tx_hash: String,
    pub waited: Duration,
}

/// Why waiting for confirmation stopped without reaching the threshold
#[derive(Debug, Error)]
pub enum ConfirmationError {
    #[error(transparent)]
    Timeout(#[from] ChainTimeoutError),

    #[error("Transaction {tx_hash} was reverted")]
    Reverted { tx_hash: String },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Confirmation wait cancelled")]
    Cancelled,
}
