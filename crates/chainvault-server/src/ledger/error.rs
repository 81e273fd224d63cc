use thiserror::Error;
use uuid::Uuid;

use crate::models::JobState;

/// Optimistic version check failed: someone else moved the job first
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Job {job_id} was modified concurrently (expected version {expected})")]
pub struct LedgerConflictError {
    pub job_id: Uuid,
    pub expected: i64,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Ledger migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Conflict(#[from] LedgerConflictError),

    #[error("Illegal job transition {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Ledger invariant violated: {0}")]
    Invariant(String),

    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),
}

impl LedgerError {
    pub fn not_found(resource_type: &str, identifier: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} '{}' not found", resource_type, identifier))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
