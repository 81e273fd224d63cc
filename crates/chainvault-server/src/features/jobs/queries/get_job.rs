use serde::Serialize;
use uuid::Uuid;

use crate::models::JobTransition;
use crate::pipeline::{JobView, Orchestrator, PipelineError};

#[derive(Debug, Clone, Copy)]
pub struct GetJobQuery {
    pub job_id: Uuid,
}

/// Job detail plus its full transition history
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetJobResponse {
    #[serde(flatten)]
    pub view: JobView,
    pub transitions: Vec<JobTransition>,
}

#[tracing::instrument(skip(orchestrator))]
pub async fn handle(
    orchestrator: &Orchestrator,
    query: GetJobQuery,
) -> Result<GetJobResponse, PipelineError> {
    let view = orchestrator.job_view(query.job_id).await?;
    let transitions = orchestrator.ledger().transitions(query.job_id).await?;
    Ok(GetJobResponse { view, transitions })
}
