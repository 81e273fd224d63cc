//! HTTP error type shared by all feature routes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::response::ErrorResponse;
use crate::chain::ChainSubmissionError;
use crate::crypto::CryptoError;
use crate::ledger::LedgerError;
use crate::pipeline::PipelineError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    #[error("{0}")]
    Unavailable(String),

    /// Logged with its cause, answered with a generic message
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            AppError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(cause) => {
                tracing::error!(cause = %cause, "Request failed");
                "An internal error occurred".to_string()
            },
            other => other.to_string(),
        };

        (status, Json(ErrorResponse::new(self.code(), message))).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(message) => AppError::Validation(message),
            PipelineError::NetworkDisabled(_) => AppError::Validation(err.to_string()),
            PipelineError::JobNotFound(_)
            | PipelineError::TransactionNotFound(_)
            | PipelineError::PayloadMissing(_)
            | PipelineError::Crypto(CryptoError::KeyNotFound(_)) => AppError::NotFound(err.to_string()),
            PipelineError::NotCancellable { .. }
            | PipelineError::InvalidState { .. }
            | PipelineError::Superseded(_) => AppError::Conflict(err.to_string()),
            PipelineError::Ledger(LedgerError::Conflict(_)) => AppError::Conflict(
                "The job is being updated concurrently, retry the request".to_string(),
            ),
            PipelineError::Ledger(LedgerError::NotFound(message)) => AppError::NotFound(message),
            PipelineError::Submission(ChainSubmissionError::Rejected { network, .. })
            | PipelineError::Submission(ChainSubmissionError::Exhausted { network, .. }) => {
                tracing::error!(error = %err, "Anchor submission failed");
                AppError::Internal(format!("submission to {} failed", network))
            },
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        PipelineError::Ledger(err).into()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::chain::Network;
    use crate::models::JobState;
    use uuid::Uuid;

    #[test]
    fn test_pipeline_error_status_mapping() {
        let cases = [
            (PipelineError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (PipelineError::NetworkDisabled(Network::Bsc), StatusCode::BAD_REQUEST),
            (PipelineError::JobNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (PipelineError::TransactionNotFound("0x1".into()), StatusCode::NOT_FOUND),
            (
                PipelineError::NotCancellable {
                    job_id: Uuid::nil(),
                    state: JobState::Anchoring,
                },
                StatusCode::CONFLICT,
            ),
            (
                PipelineError::Submission(ChainSubmissionError::Exhausted {
                    network: Network::Polygon,
                    attempts: 5,
                    last: "connection reset".into(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (PipelineError::Integrity("sha mismatch".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            let label = err.to_string();
            assert_eq!(AppError::from(err).status(), expected, "{label}");
        }
    }

    #[test]
    fn test_internal_cause_is_not_echoed() {
        let err = AppError::from(PipelineError::Submission(ChainSubmissionError::Rejected {
            network: Network::Ethereum,
            reason: "insufficient funds for gas at 0xdeadbeef".into(),
        }));
        assert_eq!(err.code(), "INTERNAL_ERROR");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
