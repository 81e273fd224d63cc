//! Staged (prepared but uncommitted) transitions

use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use super::{LedgerError, LedgerResult};
use crate::models::{ChainRecord, ConvertedArtifact, EncryptedPayloadRecord, Job, JobState};

/// A job transition holding the ledger write lock.
///
/// Stage records produced alongside the state change are written into the
/// same transaction. Nothing is visible until [`commit`](Self::commit);
/// dropping the value rolls everything back.
pub struct StagedTransition {
    pub(super) tx: Transaction<'static, Sqlite>,
    pub(super) job: Job,
    pub(super) from: JobState,
}

impl StagedTransition {
    /// The job as it will look once committed
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn from_state(&self) -> JobState {
        self.from
    }

    pub async fn record_artifact(&mut self, artifact: &ConvertedArtifact) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO artifacts (job_id, location, json_checksum, byte_size, row_count, table_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(job_id) DO UPDATE SET
                location = excluded.location,
                json_checksum = excluded.json_checksum,
                byte_size = excluded.byte_size,
                row_count = excluded.row_count,
                table_count = excluded.table_count,
                created_at = excluded.created_at
            "#,
        )
        .bind(artifact.job_id)
        .bind(&artifact.location)
        .bind(&artifact.json_checksum)
        .bind(artifact.byte_size)
        .bind(artifact.row_count)
        .bind(artifact.table_count)
        .bind(artifact.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn record_payload(&mut self, payload: &EncryptedPayloadRecord) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO encrypted_payloads (job_id, location, content_hash, key_id, algorithm, tier, byte_size, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(job_id) DO UPDATE SET
                location = excluded.location,
                content_hash = excluded.content_hash,
                key_id = excluded.key_id,
                algorithm = excluded.algorithm,
                tier = excluded.tier,
                byte_size = excluded.byte_size,
                created_at = excluded.created_at
            "#,
        )
        .bind(payload.job_id)
        .bind(&payload.location)
        .bind(&payload.content_hash)
        .bind(&payload.key_id)
        .bind(&payload.algorithm)
        .bind(payload.tier.as_str())
        .bind(payload.byte_size)
        .bind(payload.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn record_chain(&mut self, record: &ChainRecord) -> LedgerResult<()> {
        super::upsert_chain_record(&mut *self.tx, record).await
    }

    /// Commit the transition. A job may only become `Confirmed` when its
    /// artifact and at least one confirmed chain record are in the ledger.
    pub async fn commit(mut self) -> LedgerResult<Job> {
        if self.job.state == JobState::Confirmed {
            let row = sqlx::query(
                r#"
                SELECT
                    EXISTS(SELECT 1 FROM artifacts WHERE job_id = ?1) AS has_artifact,
                    EXISTS(SELECT 1 FROM chain_records WHERE job_id = ?1 AND status = 'confirmed') AS has_anchor
                "#,
            )
            .bind(self.job.id)
            .fetch_one(&mut *self.tx)
            .await?;

            let has_artifact: bool = row.try_get("has_artifact")?;
            let has_anchor: bool = row.try_get("has_anchor")?;
            if !has_artifact || !has_anchor {
                return Err(LedgerError::Invariant(format!(
                    "job {} cannot be confirmed without an artifact and a confirmed chain record",
                    self.job.id
                )));
            }
        }

        self.tx.commit().await?;
        debug!(
            job_id = %self.job.id,
            from = %self.from,
            to = %self.job.state,
            version = self.job.version,
            "Transition committed"
        );
        Ok(self.job)
    }
}
