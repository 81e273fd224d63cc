use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::JobState;
use crate::pipeline::{DeleteOutcome, Orchestrator, PipelineError};

/// `DELETE /files/{fileId}[?permanent=true]`
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteFileCommand {
    #[serde(skip)]
    pub job_id: Uuid,
    /// Also destroy the encrypted payload and its key
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileResponse {
    pub job_id: Uuid,
    /// `cancelled` when the job was still running, `deleted` otherwise
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteFileError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[tracing::instrument(skip(orchestrator))]
pub async fn handle(
    orchestrator: &Orchestrator,
    command: DeleteFileCommand,
) -> Result<DeleteFileResponse, DeleteFileError> {
    let response = match orchestrator.delete(command.job_id, command.permanent).await? {
        DeleteOutcome::Cancelled(job) => DeleteFileResponse {
            job_id: job.id,
            outcome: "cancelled",
            state: Some(job.state),
        },
        DeleteOutcome::Deleted => DeleteFileResponse {
            job_id: command.job_id,
            outcome: "deleted",
            state: None,
        },
    };
    Ok(response)
}

impl From<DeleteFileError> for AppError {
    fn from(err: DeleteFileError) -> Self {
        match err {
            DeleteFileError::Pipeline(err) => err.into(),
        }
    }
}
