use serde::{Deserialize, Serialize};

use crate::chain::Network;
use crate::error::AppError;
use crate::models::ChainRecord;
use crate::pipeline::{Orchestrator, PipelineError};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

/// `GET /blockchain/transactions?network=&limit=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionsQuery {
    pub network: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsResponse {
    pub transactions: Vec<ChainRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransactionsError {
    #[error("limit must be between 1 and 500")]
    InvalidLimit,
    #[error("Unknown network '{0}'")]
    UnknownNetwork(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl TransactionsQuery {
    pub fn validate(&self) -> Result<(Option<Network>, i64), TransactionsError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(TransactionsError::InvalidLimit);
        }
        let network = self
            .network
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .map(|n| {
                n.parse::<Network>()
                    .map_err(|_| TransactionsError::UnknownNetwork(n.to_string()))
            })
            .transpose()?;
        Ok((network, limit))
    }
}

#[tracing::instrument(skip(orchestrator))]
pub async fn handle(
    orchestrator: &Orchestrator,
    query: TransactionsQuery,
) -> Result<TransactionsResponse, TransactionsError> {
    let (network, limit) = query.validate()?;
    let transactions = orchestrator
        .ledger()
        .recent_chain_records(network, limit)
        .await
        .map_err(PipelineError::Ledger)?;
    Ok(TransactionsResponse { transactions })
}

impl From<TransactionsError> for AppError {
    fn from(err: TransactionsError) -> Self {
        match err {
            TransactionsError::Pipeline(err) => err.into(),
            other => AppError::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(TransactionsQuery::default().validate().unwrap(), (None, 50));
    }

    #[test]
    fn test_bounds_and_network() {
        let q = TransactionsQuery {
            network: Some("eth".into()),
            limit: Some(500),
        };
        assert_eq!(q.validate().unwrap(), (Some(Network::Ethereum), 500));

        let q = TransactionsQuery {
            network: None,
            limit: Some(0),
        };
        assert!(matches!(q.validate(), Err(TransactionsError::InvalidLimit)));
    }
}
