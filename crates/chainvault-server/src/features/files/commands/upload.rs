use chainvault_common::types::SourceFormat;
use chainvault_convert::Spool;
use serde::Serialize;
use uuid::Uuid;

use crate::chain::Network;
use crate::config::PipelineConfig;
use crate::crypto::EncryptionTier;
use crate::error::AppError;
use crate::models::JobState;
use crate::pipeline::{Orchestrator, PipelineError, Upload};

const MAX_FILE_NAME_LEN: usize = 255;

/// Multipart form of `POST /files/upload`, after the file has been received
pub struct UploadFileCommand {
    pub file_name: Option<String>,
    pub conversion_type: Option<String>,
    pub blockchain_network: Option<String>,
    pub encryption_level: Option<String>,
    pub infer_types: Option<String>,
    pub data: Spool,
    /// SHA-256 of `data`
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileResponse {
    pub job_id: Uuid,
    pub state: JobState,
    pub file_name: String,
    pub conversion_type: &'static str,
    pub size: i64,
    pub checksum: String,
    pub network: Network,
    pub encryption_level: EncryptionTier,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadFileError {
    #[error("A 'file' field is required")]
    FileRequired,
    #[error("File name must not exceed 255 characters")]
    FileNameLength,
    #[error("Uploaded file is empty")]
    ContentRequired,
    #[error("Unknown conversionType '{0}' (expected sql-to-json or csv-to-json)")]
    UnknownConversionType(String),
    #[error("conversionType is required: cannot tell the format of '{0}' from its extension")]
    FormatUndetermined(String),
    #[error("Unknown blockchainNetwork '{0}'")]
    UnknownNetwork(String),
    #[error("Unknown encryptionLevel '{0}' (expected standard or high)")]
    UnknownEncryptionLevel(String),
    #[error("inferTypes must be true or false, got '{0}'")]
    InvalidInferTypes(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl UploadFileCommand {
    /// Resolve the form fields into an [`Upload`], filling in defaults
    pub fn validate(self, defaults: &PipelineConfig) -> Result<Upload, UploadFileError> {
        let file_name = self
            .file_name
            .filter(|name| !name.trim().is_empty())
            .ok_or(UploadFileError::FileRequired)?;
        if file_name.chars().count() > MAX_FILE_NAME_LEN {
            return Err(UploadFileError::FileNameLength);
        }
        if self.data.is_empty() {
            return Err(UploadFileError::ContentRequired);
        }

        let format = match non_empty(self.conversion_type) {
            Some(value) => SourceFormat::from_conversion_type(&value)
                .map_err(|_| UploadFileError::UnknownConversionType(value))?,
            None => SourceFormat::from_file_name(&file_name)
                .ok_or_else(|| UploadFileError::FormatUndetermined(file_name.clone()))?,
        };

        let network = match non_empty(self.blockchain_network) {
            Some(value) => value
                .parse::<Network>()
                .map_err(|_| UploadFileError::UnknownNetwork(value))?,
            None => defaults.default_network,
        };

        let tier = match non_empty(self.encryption_level) {
            Some(value) => value
                .parse::<EncryptionTier>()
                .map_err(|_| UploadFileError::UnknownEncryptionLevel(value))?,
            None => defaults.default_tier,
        };

        let infer_types = match non_empty(self.infer_types) {
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => true,
                "false" | "0" | "off" => false,
                _ => return Err(UploadFileError::InvalidInferTypes(value)),
            },
            None => false,
        };

        Ok(Upload {
            file_name,
            format,
            network,
            tier,
            infer_types,
            data: self.data,
            checksum: self.checksum,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[tracing::instrument(skip(orchestrator, command))]
pub async fn handle(
    orchestrator: &Orchestrator,
    command: UploadFileCommand,
) -> Result<UploadFileResponse, UploadFileError> {
    let upload = command.validate(orchestrator.config())?;
    let job = orchestrator.submit(upload).await?;

    Ok(UploadFileResponse {
        job_id: job.id,
        state: job.state,
        conversion_type: job.source_file.format.conversion_type(),
        file_name: job.source_file.name,
        size: job.source_file.size,
        checksum: job.source_file.checksum,
        network: job.network,
        encryption_level: job.encryption_tier,
    })
}

impl From<UploadFileError> for AppError {
    fn from(err: UploadFileError) -> Self {
        match err {
            UploadFileError::Pipeline(err) => err.into(),
            other => AppError::Validation(other.to_string()),
        }
    }
}
