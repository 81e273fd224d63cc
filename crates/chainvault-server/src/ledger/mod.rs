//! Storage Ledger
//!
//! Durable record of every job, its stage outputs and its chain anchors,
//! kept in SQLite. Job rows carry a version counter; every state change is an
//! `UPDATE ... WHERE version = ?` plus an audit row in one transaction, so a
//! crash can never leave a half-applied transition behind.

mod decode;
mod error;
mod staged;

use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

pub use error::{LedgerConflictError, LedgerError, LedgerResult};
pub use staged::StagedTransition;

use crate::chain::Network;
use crate::config::LedgerConfig;
use crate::models::{
    ChainRecord, ChainRecordStatus, ConvertedArtifact, EncryptedPayloadRecord, Job, JobState,
    JobTransition, NewJob,
};

const JOB_COLUMNS: &str = "id, source_name, source_format, source_size, source_checksum, \
     source_location, state, network, encryption_tier, infer_types, version, failed_stage, \
     error, cancel_requested, created_at, updated_at";

const CHAIN_COLUMNS: &str = "job_id, network, tx_hash, status, confirmations, attempts, error, \
     submitted_at, updated_at";

const BUSY_TIMEOUT_SECS: u64 = 5;

/// Page request for [`Ledger::list_jobs`]
#[derive(Debug, Clone, Copy)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub page: i64,
    pub per_page: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            state: None,
            page: 1,
            per_page: 20,
        }
    }
}

/// Per-network aggregate for the analytics panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkUsage {
    pub network: Network,
    pub transactions: i64,
    pub confirmed: i64,
    pub failed: i64,
    /// Ciphertext bytes anchored by confirmed records
    pub bytes_stored: i64,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (creating if needed) the ledger at `config.url` and run migrations
    pub async fn connect(config: &LedgerConfig) -> LedgerResult<Self> {
        let in_memory = config.url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is a separate database
        let max_connections = if in_memory { 1 } else { config.max_connections };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.migrate().await?;
        info!(url = %config.url, max_connections, "Ledger ready");
        Ok(ledger)
    }

    /// Private in-memory ledger
    pub async fn in_memory() -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    async fn migrate(&self) -> LedgerResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ------------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------------

    /// Insert a job in `Queued` together with its creation audit row
    #[instrument(skip(self, new_job), fields(job_id = %new_job.id))]
    pub async fn create_job(&self, new_job: &NewJob) -> LedgerResult<Job> {
        let now = Utc::now();
        let job = Job {
            id: new_job.id,
            source_file: new_job.source_file.clone(),
            state: JobState::Queued,
            network: new_job.network,
            encryption_tier: new_job.encryption_tier,
            infer_types: new_job.infer_types,
            version: 1,
            failed_stage: None,
            error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (id, source_name, source_format, source_size, source_checksum,
                              source_location, state, network, encryption_tier, infer_types,
                              version, cancel_requested, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?12)
            "#,
        )
        .bind(job.id)
        .bind(&job.source_file.name)
        .bind(job.source_file.format.as_str())
        .bind(job.source_file.size)
        .bind(&job.source_file.checksum)
        .bind(&job.source_file.location)
        .bind(job.state.as_str())
        .bind(job.network.as_str())
        .bind(job.encryption_tier.as_str())
        .bind(job.infer_types)
        .bind(job.version)
        .bind(now)
        .execute(&mut *tx)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &inserted {
            if db_err.is_unique_violation() {
                return Err(LedgerError::Invariant(format!("job {} already exists", job.id)));
            }
        }
        inserted?;

        insert_transition(&mut *tx, job.id, None, JobState::Queued, Some("accepted"), now).await?;
        tx.commit().await?;
        Ok(job)
    }

    pub async fn find_job(&self, id: Uuid) -> LedgerResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode::job).transpose()
    }

    pub async fn get_job(&self, id: Uuid) -> LedgerResult<Job> {
        self.find_job(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Job", id))
    }

    /// Newest first, optionally filtered by state. Returns the page and the total count.
    pub async fn list_jobs(&self, filter: &JobFilter) -> LedgerResult<(Vec<Job>, i64)> {
        let per_page = filter.per_page.clamp(1, 100);
        let offset = (filter.page.max(1) - 1) * per_page;
        let state = filter.state.map(|s| s.as_str());

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM jobs WHERE (?1 IS NULL OR state = ?1)",
        )
        .bind(state)
        .fetch_one(&self.pool)
        .await?
        .try_get("count")?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE (?1 IS NULL OR state = ?1) \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
            JOB_COLUMNS
        ))
        .bind(state)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let jobs = rows.iter().map(decode::job).collect::<LedgerResult<Vec<_>>>()?;
        Ok((jobs, total))
    }

    /// All jobs currently in `state`, oldest first
    pub async fn jobs_in_state(&self, state: JobState) -> LedgerResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE state = ?1 ORDER BY created_at, rowid",
            JOB_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode::job).collect()
    }

    /// Number of jobs per state
    pub async fn job_counts(&self) -> LedgerResult<Vec<(JobState, i64)>> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS count FROM jobs GROUP BY state ORDER BY state")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> LedgerResult<(JobState, i64)> {
                let state: String = row.try_get("state")?;
                let state: JobState = state.parse().map_err(LedgerError::Corrupt)?;
                Ok((state, row.try_get("count")?))
            })
            .collect()
    }

    /// Flag a job for cancellation. Does not bump the version.
    pub async fn request_cancel(&self, id: Uuid) -> LedgerResult<bool> {
        let result = sqlx::query("UPDATE jobs SET cancel_requested = 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a job and everything recorded for it
    pub async fn delete_job(&self, id: Uuid) -> LedgerResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Prepare `job -> to`. The job row is updated first so the transaction
    /// holds the write lock for everything recorded afterwards.
    ///
    /// Fails with [`LedgerError::Conflict`] when `job.version` is stale.
    #[instrument(skip(self, job, detail), fields(job_id = %job.id, from = %job.state, to = %to))]
    pub async fn begin_transition(
        &self,
        job: &Job,
        to: JobState,
        detail: Option<String>,
    ) -> LedgerResult<StagedTransition> {
        if !job.state.can_transition(to, job.failed_stage) {
            return Err(LedgerError::InvalidTransition {
                from: job.state,
                to,
            });
        }

        let now = Utc::now();
        let (failed_stage, error) = if to == JobState::Failed {
            (Some(job.state), detail.clone())
        } else {
            (None, None)
        };

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?1, version = version + 1, failed_stage = ?2, error = ?3, updated_at = ?4
            WHERE id = ?5 AND version = ?6
            "#,
        )
        .bind(to.as_str())
        .bind(failed_stage.map(|s| s.as_str()))
        .bind(error.as_deref())
        .bind(now)
        .bind(job.id)
        .bind(job.version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            drop(tx);
            return match self.find_job(job.id).await? {
                None => Err(LedgerError::not_found("Job", job.id)),
                Some(_) => Err(LedgerConflictError {
                    job_id: job.id,
                    expected: job.version,
                }
                .into()),
            };
        }

        insert_transition(&mut *tx, job.id, Some(job.state), to, detail.as_deref(), now).await?;

        let mut next = job.clone();
        next.state = to;
        next.version = job.version + 1;
        next.failed_stage = failed_stage;
        next.error = error;
        next.updated_at = now;

        Ok(StagedTransition {
            tx,
            job: next,
            from: job.state,
        })
    }

    /// Stage and immediately commit a transition with no stage records
    pub async fn transition(
        &self,
        job: &Job,
        to: JobState,
        detail: Option<String>,
    ) -> LedgerResult<Job> {
        self.begin_transition(job, to, detail).await?.commit().await
    }

    pub async fn transitions(&self, job_id: Uuid) -> LedgerResult<Vec<JobTransition>> {
        let rows = sqlx::query(
            "SELECT job_id, seq, from_state, to_state, detail, at FROM job_transitions \
             WHERE job_id = ?1 ORDER BY seq",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode::transition).collect()
    }

    pub async fn count_transitions(
        &self,
        job_id: Uuid,
        from: JobState,
        to: JobState,
    ) -> LedgerResult<i64> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM job_transitions \
             WHERE job_id = ?1 AND from_state = ?2 AND to_state = ?3",
        )
        .bind(job_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_one(&self.pool)
        .await?
        .try_get("count")?;
        Ok(count)
    }

    // ------------------------------------------------------------------------
    // Stage outputs
    // ------------------------------------------------------------------------

    pub async fn artifact(&self, job_id: Uuid) -> LedgerResult<Option<ConvertedArtifact>> {
        let row = sqlx::query(
            "SELECT job_id, location, json_checksum, byte_size, row_count, table_count, created_at \
             FROM artifacts WHERE job_id = ?1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode::artifact).transpose()
    }

    pub async fn payload(&self, job_id: Uuid) -> LedgerResult<Option<EncryptedPayloadRecord>> {
        let row = sqlx::query(
            "SELECT job_id, location, content_hash, key_id, algorithm, tier, byte_size, created_at \
             FROM encrypted_payloads WHERE job_id = ?1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode::payload).transpose()
    }

    // ------------------------------------------------------------------------
    // Chain records
    // ------------------------------------------------------------------------

    pub async fn chain_records(&self, job_id: Uuid) -> LedgerResult<Vec<ChainRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chain_records WHERE job_id = ?1 ORDER BY network",
            CHAIN_COLUMNS
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode::chain_record).collect()
    }

    pub async fn chain_record(
        &self,
        job_id: Uuid,
        network: Network,
    ) -> LedgerResult<Option<ChainRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM chain_records WHERE job_id = ?1 AND network = ?2",
            CHAIN_COLUMNS
        ))
        .bind(job_id)
        .bind(network.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode::chain_record).transpose()
    }

    /// Update a chain record outside a job transition (confirmation progress,
    /// extra networks of a confirmed job)
    pub async fn upsert_chain_record(&self, record: &ChainRecord) -> LedgerResult<()> {
        upsert_chain_record(&self.pool, record).await
    }

    pub async fn find_chain_record_by_tx(&self, tx_hash: &str) -> LedgerResult<Option<ChainRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM chain_records WHERE tx_hash = ?1 COLLATE NOCASE LIMIT 1",
            CHAIN_COLUMNS
        ))
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode::chain_record).transpose()
    }

    pub async fn recent_chain_records(
        &self,
        network: Option<Network>,
        limit: i64,
    ) -> LedgerResult<Vec<ChainRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chain_records \
             WHERE tx_hash IS NOT NULL AND (?1 IS NULL OR network = ?1) \
             ORDER BY updated_at DESC LIMIT ?2",
            CHAIN_COLUMNS
        ))
        .bind(network.map(|n| n.as_str()))
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode::chain_record).collect()
    }

    /// Records not yet confirmed or failed, submitted or not
    pub async fn pending_chain_records(&self) -> LedgerResult<Vec<ChainRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chain_records WHERE status = 'pending' ORDER BY updated_at",
            CHAIN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode::chain_record).collect()
    }

    pub async fn network_usage(&self) -> LedgerResult<Vec<NetworkUsage>> {
        let rows = sqlx::query(
            r#"
            SELECT
                c.network AS network,
                COUNT(c.tx_hash) AS transactions,
                SUM(CASE WHEN c.status = 'confirmed' THEN 1 ELSE 0 END) AS confirmed,
                SUM(CASE WHEN c.status = 'failed' THEN 1 ELSE 0 END) AS failed,
                COALESCE(SUM(CASE WHEN c.status = 'confirmed' THEN p.byte_size ELSE 0 END), 0) AS bytes_stored
            FROM chain_records c
            LEFT JOIN encrypted_payloads p ON p.job_id = c.job_id
            GROUP BY c.network
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> LedgerResult<NetworkUsage> {
                let network: String = row.try_get("network")?;
                Ok(NetworkUsage {
                    network: network
                        .parse()
                        .map_err(|e: crate::chain::UnknownNetwork| LedgerError::Corrupt(e.to_string()))?,
                    transactions: row.try_get("transactions")?,
                    confirmed: row.try_get("confirmed")?,
                    failed: row.try_get("failed")?,
                    bytes_stored: row.try_get("bytes_stored")?,
                })
            })
            .collect()
    }
}

async fn insert_transition<'e, E>(
    executor: E,
    job_id: Uuid,
    from: Option<JobState>,
    to: JobState,
    detail: Option<&str>,
    at: chrono::DateTime<Utc>,
) -> LedgerResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO job_transitions (job_id, seq, from_state, to_state, detail, at)
        SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3, ?4, ?5
        FROM job_transitions WHERE job_id = ?1
        "#,
    )
    .bind(job_id)
    .bind(from.map(|s| s.as_str()))
    .bind(to.as_str())
    .bind(detail)
    .bind(at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn upsert_chain_record<'e, E>(executor: E, record: &ChainRecord) -> LedgerResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO chain_records (job_id, network, tx_hash, status, confirmations, attempts, error, submitted_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(job_id, network) DO UPDATE SET
            tx_hash = excluded.tx_hash,
            status = excluded.status,
            confirmations = excluded.confirmations,
            attempts = excluded.attempts,
            error = excluded.error,
            submitted_at = excluded.submitted_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(record.job_id)
    .bind(record.network.as_str())
    .bind(record.tx_hash.as_deref())
    .bind(record.status.as_str())
    .bind(record.confirmations)
    .bind(record.attempts)
    .bind(record.error.as_deref())
    .bind(record.submitted_at)
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionTier;
    use crate::models::SourceFile;
    use chainvault_common::types::SourceFormat;

    fn new_job() -> NewJob {
        let id = Uuid::new_v4();
        NewJob {
            id,
            source_file: SourceFile {
                name: "people.csv".into(),
                format: SourceFormat::Csv,
                size: 12,
                checksum: "ab".repeat(32),
                location: format!("uploads/{}/people.csv", id),
            },
            network: Network::Polygon,
            encryption_tier: EncryptionTier::Standard,
            infer_types: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let ledger = Ledger::in_memory().await.unwrap();
        let created = ledger.create_job(&new_job()).await.unwrap();
        let loaded = ledger.get_job(created.id).await.unwrap();

        assert_eq!(loaded.state, JobState::Queued);
        assert_eq!(loaded.network, Network::Polygon);
        assert_eq!(loaded.encryption_tier, EncryptionTier::Standard);
        assert_eq!(loaded.source_file, created.source_file);
        assert_eq!(loaded.version, 1);

        let transitions = ledger.transitions(created.id).await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from_state, None);
        assert_eq!(transitions[0].to_state, JobState::Queued);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let ledger = Ledger::in_memory().await.unwrap();
        let job = ledger.create_job(&new_job()).await.unwrap();

        ledger.transition(&job, JobState::Parsing, None).await.unwrap();
        let err = ledger
            .transition(&job, JobState::Parsing, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let current = ledger.get_job(job.id).await.unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(ledger.transitions(job.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_rejected() {
        let ledger = Ledger::in_memory().await.unwrap();
        let job = ledger.create_job(&new_job()).await.unwrap();
        let err = ledger
            .transition(&job, JobState::Encrypting, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_dropped_stage_leaves_no_trace() {
        let ledger = Ledger::in_memory().await.unwrap();
        let job = ledger.create_job(&new_job()).await.unwrap();

        let staged = ledger
            .begin_transition(&job, JobState::Parsing, None)
            .await
            .unwrap();
        assert_eq!(staged.job().state, JobState::Parsing);
        drop(staged);

        let current = ledger.get_job(job.id).await.unwrap();
        assert_eq!(current.state, JobState::Queued);
        assert_eq!(current.version, job.version);
        assert_eq!(ledger.transitions(job.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_records_stage_and_cause() {
        let ledger = Ledger::in_memory().await.unwrap();
        let job = ledger.create_job(&new_job()).await.unwrap();
        let job = ledger.transition(&job, JobState::Parsing, None).await.unwrap();
        let failed = ledger
            .transition(&job, JobState::Failed, Some("bad quote at line 3".into()))
            .await
            .unwrap();

        let loaded = ledger.get_job(failed.id).await.unwrap();
        assert_eq!(loaded.failed_stage, Some(JobState::Parsing));
        assert_eq!(loaded.error.as_deref(), Some("bad quote at line 3"));
    }

    #[tokio::test]
    async fn test_confirm_requires_artifact_and_anchor() {
        let ledger = Ledger::in_memory().await.unwrap();
        let mut job = ledger.create_job(&new_job()).await.unwrap();
        for to in [
            JobState::Parsing,
            JobState::Converting,
            JobState::Encrypting,
            JobState::Anchoring,
        ] {
            job = ledger.transition(&job, to, None).await.unwrap();
        }

        let err = ledger
            .transition(&job, JobState::Confirmed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Invariant(_)));
        assert_eq!(ledger.get_job(job.id).await.unwrap().state, JobState::Anchoring);

        let mut staged = ledger
            .begin_transition(&job, JobState::Confirmed, None)
            .await
            .unwrap();
        staged
            .record_artifact(&ConvertedArtifact {
                job_id: job.id,
                location: "artifacts/x.json".into(),
                json_checksum: "cd".repeat(32),
                byte_size: 10,
                row_count: 1,
                table_count: 1,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let mut record = ChainRecord::pending(job.id, Network::Polygon);
        record.tx_hash = Some("0xabc".into());
        record.status = ChainRecordStatus::Confirmed;
        record.confirmations = 64;
        staged.record_chain(&record).await.unwrap();
        let confirmed = staged.commit().await.unwrap();

        assert_eq!(confirmed.state, JobState::Confirmed);
        let found = ledger.find_chain_record_by_tx("0xABC").await.unwrap().unwrap();
        assert_eq!(found.job_id, job.id);
    }

    #[tokio::test]
    async fn test_chain_record_upsert_replaces() {
        let ledger = Ledger::in_memory().await.unwrap();
        let job = ledger.create_job(&new_job()).await.unwrap();

        let mut record = ChainRecord::pending(job.id, Network::Bsc);
        record.status = ChainRecordStatus::Failed;
        record.attempts = 5;
        ledger.upsert_chain_record(&record).await.unwrap();

        record.status = ChainRecordStatus::Pending;
        record.tx_hash = Some("0x01".into());
        record.attempts = 1;
        ledger.upsert_chain_record(&record).await.unwrap();

        let records = ledger.chain_records(job.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tx_hash.as_deref(), Some("0x01"));
        assert_eq!(records[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_list_jobs_paginates_and_filters() {
        let ledger = Ledger::in_memory().await.unwrap();
        for _ in 0..5 {
            ledger.create_job(&new_job()).await.unwrap();
        }
        let parsing = ledger.create_job(&new_job()).await.unwrap();
        ledger.transition(&parsing, JobState::Parsing, None).await.unwrap();

        let (page, total) = ledger
            .list_jobs(&JobFilter {
                state: None,
                page: 2,
                per_page: 4,
            })
            .await
            .unwrap();
        assert_eq!(total, 6);
        assert_eq!(page.len(), 2);

        let (parsing_jobs, total) = ledger
            .list_jobs(&JobFilter {
                state: Some(JobState::Parsing),
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(parsing_jobs[0].id, parsing.id);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let ledger = Ledger::in_memory().await.unwrap();
        let job = ledger.create_job(&new_job()).await.unwrap();
        ledger
            .upsert_chain_record(&ChainRecord::pending(job.id, Network::Ethereum))
            .await
            .unwrap();

        assert!(ledger.delete_job(job.id).await.unwrap());
        assert!(ledger.find_job(job.id).await.unwrap().is_none());
        assert!(ledger.chain_records(job.id).await.unwrap().is_empty());
        assert!(ledger.transitions(job.id).await.unwrap().is_empty());
        assert!(!ledger.delete_job(job.id).await.unwrap());
    }
}
