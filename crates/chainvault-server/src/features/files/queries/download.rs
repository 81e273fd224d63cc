use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::pipeline::{Orchestrator, PipelineError};

const PRESIGNED_URL_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct DownloadFileQuery {
    pub job_id: Uuid,
}

/// Where the converted JSON can be read from
#[derive(Debug, Clone)]
pub enum DownloadFileResponse {
    /// Stream this file from local storage
    Local {
        path: PathBuf,
        file_name: String,
        size: i64,
    },
    /// Redirect to a presigned object URL
    Presigned { url: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadFileError {
    #[error("Job '{0}' has no converted JSON yet")]
    NotConverted(Uuid),
    #[error("Converted JSON for job '{0}' is no longer stored")]
    Missing(Uuid),
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// `people.csv` -> `people.json`
pub fn json_file_name(source_name: &str) -> String {
    let stem = source_name.strip_suffix(".gz").unwrap_or(source_name);
    let stem = stem.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(stem);
    format!("{}.json", if stem.is_empty() { "converted" } else { stem })
}

#[tracing::instrument(skip(orchestrator))]
pub async fn handle(
    orchestrator: &Orchestrator,
    query: DownloadFileQuery,
) -> Result<DownloadFileResponse, DownloadFileError> {
    let view = orchestrator.job_view(query.job_id).await?;
    let artifact = view
        .artifact
        .ok_or(DownloadFileError::NotConverted(query.job_id))?;

    let storage = orchestrator.storage();
    if !storage.exists(&artifact.location).await? {
        return Err(DownloadFileError::Missing(query.job_id));
    }

    if let Some(path) = storage.local_path(&artifact.location) {
        return Ok(DownloadFileResponse::Local {
            path,
            file_name: json_file_name(&view.job.source_file.name),
            size: artifact.byte_size,
        });
    }

    match storage
        .presigned_url(&artifact.location, Duration::from_secs(PRESIGNED_URL_TTL_SECS))
        .await?
    {
        Some(url) => Ok(DownloadFileResponse::Presigned { url }),
        None => Err(DownloadFileError::Missing(query.job_id)),
    }
}

impl From<DownloadFileError> for AppError {
    fn from(err: DownloadFileError) -> Self {
        match err {
            DownloadFileError::NotConverted(_) => AppError::Conflict(err.to_string()),
            DownloadFileError::Missing(_) => AppError::NotFound(err.to_string()),
            DownloadFileError::Storage(e) => AppError::Internal(format!("{:#}", e)),
            DownloadFileError::Pipeline(e) => e.into(),
        }
    }
}
