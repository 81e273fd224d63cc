use chainvault_convert::ParseError;
use thiserror::Error;
use uuid::Uuid;

use crate::chain::{ChainError, ChainSubmissionError, ChainTimeoutError, ConfirmationError, Network};
use crate::crypto::CryptoError;
use crate::ledger::LedgerError;
use crate::models::JobState;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Submission(#[from] ChainSubmissionError),

    #[error(transparent)]
    Timeout(#[from] ChainTimeoutError),

    #[error("Anchor transaction {tx_hash} was reverted")]
    Reverted { tx_hash: String },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("Job '{0}' not found")]
    JobNotFound(Uuid),

    #[error("Transaction '{0}' not found")]
    TransactionNotFound(String),

    #[error("Payload for transaction '{0}' is no longer stored")]
    PayloadMissing(String),

    #[error("Job {job_id} cannot be cancelled once it is {state}")]
    NotCancellable { job_id: Uuid, state: JobState },

    #[error("Job {job_id} is {state}: {reason}")]
    InvalidState {
        job_id: Uuid,
        state: JobState,
        reason: String,
    },

    #[error("Network '{0}' is not enabled")]
    NetworkDisabled(Network),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Job {0} was moved on by another writer")]
    Superseded(Uuid),

    #[error("Job {0} stopped: cancelled")]
    Cancelled(Uuid),

    #[error("Worker task failed: {0}")]
    Task(String),

    #[error("{0}")]
    Validation(String),
}

impl PipelineError {
    /// Errors that end the job in `Failed` rather than leaving it to be resumed
    pub fn fails_job(&self) -> bool {
        matches!(
            self,
            PipelineError::Parse(_)
                | PipelineError::Crypto(_)
                | PipelineError::Submission(ChainSubmissionError::Rejected { .. })
                | PipelineError::Submission(ChainSubmissionError::Exhausted { .. })
                | PipelineError::Timeout(_)
                | PipelineError::Reverted { .. }
                | PipelineError::Chain(_)
                | PipelineError::Storage(_)
                | PipelineError::Integrity(_)
                | PipelineError::Task(_)
        )
    }

    pub(crate) fn from_ledger(err: LedgerError, job_id: Uuid) -> Self {
        match err {
            LedgerError::NotFound(_) => PipelineError::JobNotFound(job_id),
            other => PipelineError::Ledger(other),
        }
    }
}

impl From<ConfirmationError> for PipelineError {
    fn from(err: ConfirmationError) -> Self {
        match err {
            ConfirmationError::Timeout(e) => PipelineError::Timeout(e),
            ConfirmationError::Reverted { tx_hash } => PipelineError::Reverted { tx_hash },
            ConfirmationError::Chain(e) => PipelineError::Chain(e),
            ConfirmationError::Cancelled => PipelineError::Cancelled(Uuid::nil()),
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Task(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
