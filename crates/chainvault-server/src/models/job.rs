//! Job, artifact and chain record models

use chainvault_common::types::SourceFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::chain::Network;
use crate::crypto::EncryptionTier;

/// Pipeline state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Parsing,
    Converting,
    Encrypting,
    Anchoring,
    Confirmed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Parsing => "parsing",
            JobState::Converting => "converting",
            JobState::Encrypting => "encrypting",
            JobState::Anchoring => "anchoring",
            JobState::Confirmed => "confirmed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Confirmed | JobState::Failed | JobState::Cancelled)
    }

    /// States a user cancellation can still take effect in
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            JobState::Queued | JobState::Parsing | JobState::Converting | JobState::Encrypting
        )
    }

    /// Next state on the happy path
    pub fn next(&self) -> Option<JobState> {
        match self {
            JobState::Queued => Some(JobState::Parsing),
            JobState::Parsing => Some(JobState::Converting),
            JobState::Converting => Some(JobState::Encrypting),
            JobState::Encrypting => Some(JobState::Anchoring),
            JobState::Anchoring => Some(JobState::Confirmed),
            JobState::Confirmed | JobState::Failed | JobState::Cancelled => None,
        }
    }

    /// Rough completion percentage reported to the dashboard
    pub fn progress(&self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Parsing => 20,
            JobState::Converting => 40,
            JobState::Encrypting => 60,
            JobState::Anchoring => 80,
            JobState::Confirmed => 100,
            JobState::Failed | JobState::Cancelled => 100,
        }
    }

    /// Whether `self -> to` is a legal transition.
    ///
    /// `failed_stage` is the state a failed job failed in; only jobs that
    /// failed while anchoring may re-enter `Anchoring`.
    pub fn can_transition(&self, to: JobState, failed_stage: Option<JobState>) -> bool {
        match (self, to) {
            (JobState::Anchoring, JobState::Anchoring) => true,
            (JobState::Failed, JobState::Anchoring) => failed_stage == Some(JobState::Anchoring),
            (from, JobState::Failed) => !from.is_terminal(),
            (from, JobState::Cancelled) => from.is_cancellable(),
            (from, to) => from.next() == Some(to),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(JobState::Queued),
            "parsing" => Ok(JobState::Parsing),
            "converting" => Ok(JobState::Converting),
            "encrypting" => Ok(JobState::Encrypting),
            "anchoring" => Ok(JobState::Anchoring),
            "confirmed" => Ok(JobState::Confirmed),
            "failed" => Ok(JobState::Failed),
            "cancelled" | "canceled" => Ok(JobState::Cancelled),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// Uploaded source file as recorded at acceptance time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub name: String,
    pub format: SourceFormat,
    pub size: i64,
    /// SHA-256 of the uploaded bytes
    pub checksum: String,
    /// Storage key of the uploaded bytes
    #[serde(skip_serializing)]
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub source_file: SourceFile,
    pub state: JobState,
    /// Network requested at upload time
    pub network: Network,
    pub encryption_tier: EncryptionTier,
    pub infer_types: bool,
    /// Optimistic concurrency counter, bumped on every transition
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for a job about to be created in `Queued`
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub source_file: SourceFile,
    pub network: Network,
    pub encryption_tier: EncryptionTier,
    pub infer_types: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedArtifact {
    pub job_id: Uuid,
    #[serde(skip_serializing)]
    pub location: String,
    pub json_checksum: String,
    pub byte_size: i64,
    pub row_count: i64,
    pub table_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Ledger view of an encrypted payload; the ciphertext itself lives in storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayloadRecord {
    pub job_id: Uuid,
    #[serde(skip_serializing)]
    pub location: String,
    /// SHA-256 of the ciphertext
    pub content_hash: String,
    pub key_id: String,
    pub algorithm: String,
    pub tier: EncryptionTier,
    pub byte_size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainRecordStatus {
    Pending,
    Confirmed,
    Failed,
}

impl ChainRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainRecordStatus::Pending => "pending",
            ChainRecordStatus::Confirmed => "confirmed",
            ChainRecordStatus::Failed => "failed",
        }
    }
}

impl FromStr for ChainRecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChainRecordStatus::Pending),
            "confirmed" => Ok(ChainRecordStatus::Confirmed),
            "failed" => Ok(ChainRecordStatus::Failed),
            other => Err(format!("unknown chain record status '{}'", other)),
        }
    }
}

/// Anchor of a job on one network. At most one per (job, network).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRecord {
    pub job_id: Uuid,
    pub network: Network,
    /// `None` until a submission has been accepted by the network
    pub tx_hash: Option<String>,
    pub status: ChainRecordStatus,
    pub confirmations: i64,
    pub attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ChainRecord {
    /// Record for a network no submission has been made to yet
    pub fn pending(job_id: Uuid, network: Network) -> Self {
        Self {
            job_id,
            network,
            tx_hash: None,
            status: ChainRecordStatus::Pending,
            confirmations: 0,
            attempts: 0,
            error: None,
            submitted_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// Append-only audit row written with every state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTransition {
    pub job_id: Uuid,
    pub seq: i64,
    /// `None` for the creation row
    pub from_state: Option<JobState>,
    pub to_state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}
