use serde::Serialize;
use uuid::Uuid;

use crate::models::JobState;
use crate::pipeline::{CancelOutcome, Orchestrator, PipelineError};

/// `POST /jobs/{jobId}/cancel`
#[derive(Debug, Clone, Copy)]
pub struct CancelJobCommand {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelJobResponse {
    pub job_id: Uuid,
    pub state: JobState,
    /// False when the job had already failed or been cancelled
    pub changed: bool,
}

/// Cancel a job that has not started anchoring.
/// Anchoring and confirmed jobs answer with a conflict.
#[tracing::instrument(skip(orchestrator))]
pub async fn handle(
    orchestrator: &Orchestrator,
    command: CancelJobCommand,
) -> Result<CancelJobResponse, PipelineError> {
    let (job, changed) = match orchestrator.cancel(command.job_id).await? {
        CancelOutcome::Cancelled(job) => (job, true),
        CancelOutcome::AlreadyTerminal(job) => (job, false),
    };
    Ok(CancelJobResponse {
        job_id: job.id,
        state: job.state,
        changed,
    })
}
