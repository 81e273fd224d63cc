//! Parse, convert and encrypt stages

use chainvault_common::checksum::{sha256_hex, verify_sha256};
use chainvault_convert::{CoercionRules, ParseOptions, RowCounter, Spool};
use chrono::Utc;
use tracing::{info, instrument, warn};

use super::{Orchestrator, PipelineError, PipelineResult, StageRecords};
use crate::models::{ChainRecord, ConvertedArtifact, EncryptedPayloadRecord, Job, JobState};
use crate::storage;

impl Orchestrator {
    /// Do the work of `job.state` and commit the move to the next state
    pub(super) async fn run_stage(&self, job: &Job) -> PipelineResult<Job> {
        match job.state {
            JobState::Queued => self.advance(job, JobState::Parsing, None, StageRecords::None).await,
            JobState::Parsing => match self.parse_source(job).await {
                Ok(counts) => {
                    let detail = format!("{} tables, {} rows", counts.tables, counts.rows);
                    self.advance(job, JobState::Converting, Some(detail), StageRecords::None)
                        .await
                },
                Err(err) => self.fail_stage(job, err).await,
            },
            JobState::Converting => match self.convert_source(job).await {
                Ok(artifact) => {
                    let detail = format!("{} bytes of JSON", artifact.byte_size);
                    let result = self
                        .advance(job, JobState::Encrypting, Some(detail), StageRecords::Artifact(&artifact))
                        .await;
                    if result.is_err() {
                        self.discard_object(&artifact.location).await;
                    }
                    result
                },
                Err(err) => self.fail_stage(job, err).await,
            },
            JobState::Encrypting => match self.encrypt_artifact(job).await {
                Ok((payload, record)) => {
                    let detail = format!("{} under {}", payload.algorithm, payload.key_id);
                    let result = self
                        .advance(
                            job,
                            JobState::Anchoring,
                            Some(detail),
                            StageRecords::Payload(&payload, &record),
                        )
                        .await;
                    if result.is_err() {
                        self.discard_object(&payload.location).await;
                        self.discard_key(&payload.key_id).await;
                    }
                    result
                },
                Err(err) => self.fail_stage(job, err).await,
            },
            state => Err(PipelineError::InvalidState {
                job_id: job.id,
                state,
                reason: "no stage runs in this state".to_string(),
            }),
        }
    }

    /// Record a terminal stage error as `Failed`; anything else propagates
    async fn fail_stage(&self, job: &Job, err: PipelineError) -> PipelineResult<Job> {
        if !err.fails_job() {
            return Err(err);
        }
        warn!(job_id = %job.id, stage = %job.state, error = %err, "Stage failed");
        self.advance(job, JobState::Failed, Some(err.to_string()), StageRecords::None)
            .await
    }

    fn parse_options(&self, job: &Job) -> ParseOptions {
        ParseOptions {
            max_statement_bytes: self.inner.config.max_statement_bytes,
            coercion: CoercionRules {
                infer_types: job.infer_types,
            },
            ..ParseOptions::default()
        }
    }

    /// Validate the upload end to end without producing output
    #[instrument(skip(self, job), fields(job_id = %job.id, format = %job.source_file.format))]
    async fn parse_source(&self, job: &Job) -> PipelineResult<RowCounter> {
        let reader = self.inner.storage.open_reader(&job.source_file.location).await?;
        let format = job.source_file.format;
        let options = self.parse_options(job);

        let counts = tokio::task::spawn_blocking(move || {
            let mut counter = RowCounter::default();
            chainvault_convert::parse(reader, format, &options, &mut counter).map(|()| counter)
        })
        .await??;

        info!(tables = counts.tables, rows = counts.rows, "Source parsed");
        Ok(counts)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, format = %job.source_file.format))]
    async fn convert_source(&self, job: &Job) -> PipelineResult<ConvertedArtifact> {
        let reader = self.inner.storage.open_reader(&job.source_file.location).await?;
        let format = job.source_file.format;
        let options = self.parse_options(job);
        let spool = Spool::new(self.inner.config.memory_threshold_bytes);

        let (summary, spool) = tokio::task::spawn_blocking(move || {
            chainvault_convert::convert(reader, format, &options, spool)
        })
        .await??;

        let location = storage::artifact_key(job.id);
        self.inner
            .storage
            .put_spool(&location, spool, "application/json")
            .await?;

        info!(
            tables = summary.tables,
            rows = summary.rows,
            bytes = summary.bytes,
            "Converted to JSON"
        );
        Ok(ConvertedArtifact {
            job_id: job.id,
            location,
            json_checksum: summary.sha256,
            byte_size: summary.bytes as i64,
            row_count: summary.rows as i64,
            table_count: summary.tables as i64,
            created_at: Utc::now(),
        })
    }

    /// Encrypt the stored artifact and write the ciphertext next to it.
    /// Also returns the pending chain record for the job's network.
    #[instrument(skip(self, job), fields(job_id = %job.id, tier = %job.encryption_tier))]
    async fn encrypt_artifact(
        &self,
        job: &Job,
    ) -> PipelineResult<(EncryptedPayloadRecord, ChainRecord)> {
        let artifact = self.inner.ledger.artifact(job.id).await?.ok_or_else(|| {
            PipelineError::Integrity(format!("job {} has no converted artifact", job.id))
        })?;

        let json = self.inner.storage.get(&artifact.location).await?;
        verify_sha256(&json, &artifact.json_checksum)
            .map_err(|e| PipelineError::Integrity(format!("converted artifact: {}", e)))?;

        let encrypted = self
            .inner
            .crypto
            .encrypt(job.id, json, job.encryption_tier)
            .await?;

        let location = storage::payload_key(job.id);
        let content_hash = sha256_hex(&encrypted.cipher_text);
        let byte_size = encrypted.cipher_text.len() as i64;
        if let Err(err) = self
            .inner
            .storage
            .put_bytes(&location, encrypted.cipher_text, "application/octet-stream")
            .await
        {
            self.discard_key(&encrypted.key_id).await;
            return Err(err.into());
        }

        info!(key_id = %encrypted.key_id, bytes = byte_size, "Artifact encrypted");
        Ok((
            EncryptedPayloadRecord {
                job_id: job.id,
                location,
                content_hash,
                algorithm: encrypted.tier.algorithm().to_string(),
                key_id: encrypted.key_id,
                tier: encrypted.tier,
                byte_size,
                created_at: Utc::now(),
            },
            ChainRecord::pending(job.id, job.network),
        ))
    }
}
