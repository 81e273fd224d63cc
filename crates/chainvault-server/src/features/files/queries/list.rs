use serde::{Deserialize, Serialize};

use crate::api::response::PaginationMeta;
use crate::error::AppError;
use crate::ledger::JobFilter;
use crate::models::{Job, JobState};
use crate::pipeline::{Orchestrator, PipelineError};

const DEFAULT_PER_PAGE: i64 = 20;
const MAX_PER_PAGE: i64 = 100;

/// `GET /files?state=&page=&per_page=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilesQuery {
    pub state: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListFilesResponse {
    pub jobs: Vec<Job>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, thiserror::Error)]
pub enum ListFilesError {
    #[error("Page must be greater than 0")]
    InvalidPage,
    #[error("per_page must be between 1 and 100")]
    InvalidPerPage,
    #[error("{0}")]
    InvalidState(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ListFilesQuery {
    pub fn validate(&self) -> Result<JobFilter, ListFilesError> {
        let page = self.page.unwrap_or(1);
        if page < 1 {
            return Err(ListFilesError::InvalidPage);
        }
        let per_page = self.per_page.unwrap_or(DEFAULT_PER_PAGE);
        if !(1..=MAX_PER_PAGE).contains(&per_page) {
            return Err(ListFilesError::InvalidPerPage);
        }
        let state = self
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<JobState>)
            .transpose()
            .map_err(ListFilesError::InvalidState)?;

        Ok(JobFilter {
            state,
            page,
            per_page,
        })
    }
}

#[tracing::instrument(skip(orchestrator))]
pub async fn handle(
    orchestrator: &Orchestrator,
    query: ListFilesQuery,
) -> Result<ListFilesResponse, ListFilesError> {
    let filter = query.validate()?;
    let (jobs, total) = orchestrator.list(&filter).await?;
    Ok(ListFilesResponse {
        jobs,
        pagination: PaginationMeta::new(filter.page, filter.per_page, total),
    })
}

impl From<ListFilesError> for AppError {
    fn from(err: ListFilesError) -> Self {
        match err {
            ListFilesError::Pipeline(err) => err.into(),
            other => AppError::Validation(other.to_string()),
        }
    }
}
