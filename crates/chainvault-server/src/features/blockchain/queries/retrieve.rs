use serde::Deserialize;
use uuid::Uuid;

use crate::chain::Network;
use crate::error::AppError;
use crate::pipeline::{Orchestrator, PipelineError};

/// `GET /blockchain/retrieve/{hash}[?network=]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrieveQuery {
    #[serde(skip)]
    pub tx_hash: String,
    /// Needed only for transactions the ledger does not know
    pub network: Option<String>,
}

/// Decrypted JSON, returned to the client as-is
#[derive(Debug, Clone)]
pub struct RetrieveResponse {
    pub job_id: Uuid,
    pub network: Network,
    pub tx_hash: String,
    pub json: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error("Transaction hash must be 0x followed by 64 hex digits")]
    InvalidHash,
    #[error("Unknown network '{0}'")]
    UnknownNetwork(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl RetrieveQuery {
    pub fn validate(&self) -> Result<(String, Option<Network>), RetrieveError> {
        let hash = self.tx_hash.trim();
        let digits = hash
            .strip_prefix("0x")
            .or_else(|| hash.strip_prefix("0X"))
            .ok_or(RetrieveError::InvalidHash)?;
        if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RetrieveError::InvalidHash);
        }

        let network = self
            .network
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .map(|n| {
                n.parse::<Network>()
                    .map_err(|_| RetrieveError::UnknownNetwork(n.to_string()))
            })
            .transpose()?;

        Ok((format!("0x{}", digits.to_ascii_lowercase()), network))
    }
}

#[tracing::instrument(skip(orchestrator))]
pub async fn handle(
    orchestrator: &Orchestrator,
    query: RetrieveQuery,
) -> Result<RetrieveResponse, RetrieveError> {
    let (tx_hash, network) = query.validate()?;
    let retrieved = orchestrator.retrieve(&tx_hash, network).await?;
    Ok(RetrieveResponse {
        job_id: retrieved.job_id,
        network: retrieved.network,
        tx_hash: retrieved.tx_hash,
        json: retrieved.json,
    })
}

impl From<RetrieveError> for AppError {
    fn from(err: RetrieveError) -> Self {
        match err {
            RetrieveError::Pipeline(err) => err.into(),
            other => AppError::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn query(hash: &str) -> RetrieveQuery {
        RetrieveQuery {
            tx_hash: hash.to_string(),
            network: None,
        }
    }

    #[test]
    fn test_hash_is_normalized() {
        let hash = format!("0X{}", "AB".repeat(32));
        let (normalized, network) = query(&hash).validate().unwrap();
        assert_eq!(normalized, format!("0x{}", "ab".repeat(32)));
        assert!(network.is_none());
    }

    #[test]
    fn test_rejects_malformed_hashes() {
        let bad = [
            String::new(),
            "0x".to_string(),
            "abcd".to_string(),
            format!("0x{}", "g".repeat(64)),
            format!("0x{}", "a".repeat(63)),
        ];
        for hash in &bad {
            assert!(matches!(query(hash).validate(), Err(RetrieveError::InvalidHash)), "{hash}");
        }
    }

    #[test]
    fn test_network_hint() {
        let mut q = query(&format!("0x{}", "1".repeat(64)));
        q.network = Some("polygon".into());
        assert_eq!(q.validate().unwrap().1, Some(Network::Polygon));

        q.network = Some("tron".into());
        assert!(matches!(q.validate(), Err(RetrieveError::UnknownNetwork(_))));
    }
}
