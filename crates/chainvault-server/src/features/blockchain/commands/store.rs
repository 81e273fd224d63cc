use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain::Network;
use crate::error::AppError;
use crate::pipeline::{Orchestrator, PipelineError};

/// Body of `POST /blockchain/store`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOnChainCommand {
    pub job_id: Option<Uuid>,
    /// Defaults to the network chosen at upload
    pub network: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOnChainResponse {
    pub tx_hash: String,
    pub network: Network,
    pub job_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreOnChainError {
    #[error("jobId is required")]
    JobIdRequired,
    #[error("Unknown network '{0}'")]
    UnknownNetwork(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl StoreOnChainCommand {
    /// Job ID and the explicitly requested network, if any
    pub fn validate(&self) -> Result<(Uuid, Option<Network>), StoreOnChainError> {
        let job_id = self.job_id.ok_or(StoreOnChainError::JobIdRequired)?;
        let network = self
            .network
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| {
                n.parse::<Network>()
                    .map_err(|_| StoreOnChainError::UnknownNetwork(n.to_string()))
            })
            .transpose()?;
        Ok((job_id, network))
    }
}

#[tracing::instrument(skip(orchestrator))]
pub async fn handle(
    orchestrator: &Orchestrator,
    command: StoreOnChainCommand,
) -> Result<StoreOnChainResponse, StoreOnChainError> {
    let (job_id, network) = command.validate()?;
    let network = match network {
        Some(network) => network,
        None => {
            orchestrator
                .ledger()
                .get_job(job_id)
                .await
                .map_err(|e| PipelineError::from_ledger(e, job_id))?
                .network
        },
    };

    let tx_hash = orchestrator.store(job_id, network).await?;
    Ok(StoreOnChainResponse {
        tx_hash,
        network,
        job_id,
    })
}

impl From<StoreOnChainError> for AppError {
    fn from(err: StoreOnChainError) -> Self {
        match err {
            StoreOnChainError::Pipeline(err) => err.into(),
            other => AppError::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let id = Uuid::new_v4();
        let cmd = StoreOnChainCommand {
            job_id: Some(id),
            network: Some("Avalanche".into()),
        };
        assert_eq!(cmd.validate().unwrap(), (id, Some(Network::Avalanche)));

        let cmd = StoreOnChainCommand {
            job_id: Some(id),
            network: Some(" ".into()),
        };
        assert_eq!(cmd.validate().unwrap(), (id, None));

        let cmd = StoreOnChainCommand {
            job_id: None,
            network: None,
        };
        assert!(matches!(cmd.validate(), Err(StoreOnChainError::JobIdRequired)));

        let cmd = StoreOnChainCommand {
            job_id: Some(id),
            network: Some("solana".into()),
        };
        assert!(matches!(cmd.validate(), Err(StoreOnChainError::UnknownNetwork(_))));
    }

    #[test]
    fn test_body_uses_camel_case() {
        let cmd: StoreOnChainCommand =
            serde_json::from_str(r#"{"jobId":"7d0c1b8e-3f3a-4f7e-9d52-0f4b1c2a9e11","network":"bsc"}"#)
                .unwrap();
        assert!(cmd.job_id.is_some());
        assert_eq!(cmd.network.as_deref(), Some("bsc"));
    }
}
