use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::JobState;
use crate::pipeline::{JobView, Orchestrator, PipelineError};

#[derive(Debug, Clone)]
pub struct ConvertStatusQuery {
    pub job_id: Uuid,
}

/// Answer to the dashboard's conversion poll
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertStatusResponse {
    pub state: JobState,
    pub progress: u8,
    /// Present once the JSON artifact exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub job: JobView,
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertStatusError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub fn download_url(job_id: Uuid) -> String {
    format!("/api/v1/files/{}/download", job_id)
}

#[tracing::instrument(skip(orchestrator))]
pub async fn handle(
    orchestrator: &Orchestrator,
    query: ConvertStatusQuery,
) -> Result<ConvertStatusResponse, ConvertStatusError> {
    let view = orchestrator.job_view(query.job_id).await?;
    Ok(ConvertStatusResponse {
        state: view.job.state,
        progress: view.progress,
        download_url: view.artifact.as_ref().map(|_| download_url(query.job_id)),
        job: view,
    })
}

impl From<ConvertStatusError> for AppError {
    fn from(err: ConvertStatusError) -> Self {
        match err {
            ConvertStatusError::Pipeline(err) => err.into(),
        }
    }
}
