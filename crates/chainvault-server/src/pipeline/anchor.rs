//! Anchoring: submission, confirmation tracking, resubmission and retrieval

use chainvault_common::checksum::verify_sha256;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use super::{AnchorSlot, Orchestrator, PipelineError, PipelineResult, ProgressEvent, Retrieved, StageRecords};
use crate::chain::{ChainAdapter, ChainError, ChainSubmissionError, ConfirmationError, Network, PayloadRef};
use crate::config::FailedJobPolicy;
use crate::crypto::EncryptionTier;
use crate::models::{ChainRecord, ChainRecordStatus, Job, JobState};

impl Orchestrator {
    /// Start an anchor task for every pending record of a job that just
    /// entered `Anchoring`
    pub(super) async fn start_anchoring(&self, job: &Job) -> PipelineResult<()> {
        let records = self.inner.ledger.chain_records(job.id).await?;
        let mut started = 0;
        for record in records
            .into_iter()
            .filter(|r| r.status == ChainRecordStatus::Pending)
        {
            if self.spawn_anchor(record) {
                started += 1;
            }
        }

        if started == 0 && !self.anchor_in_flight(job.id) {
            self.anchoring_settled(job.id, "no pending anchor to submit".to_string())
                .await?;
        }
        Ok(())
    }

    /// Spawn a task driving `record` to a final status. Returns false if the
    /// (job, network) pair is already being anchored.
    pub(super) fn spawn_anchor(&self, record: ChainRecord) -> bool {
        match AnchorSlot::claim(&self.inner, record.job_id, record.network) {
            Some(slot) => {
                self.spawn_anchor_task(slot, record);
                true
            },
            None => false,
        }
    }

    fn spawn_anchor_task(&self, slot: AnchorSlot, record: ChainRecord) {
        let this = self.clone();
        let span = info_span!("anchor", job_id = %record.job_id, network = %record.network);
        self.inner.tracker.spawn(
            async move {
                let _slot = slot;
                this.run_anchor(record).await;
            }
            .instrument(span),
        );
    }

    async fn run_anchor(&self, mut record: ChainRecord) {
        let outcome = match self.adapter(record.network) {
            Ok(adapter) => {
                let submitted = match record.tx_hash.clone() {
                    Some(tx_hash) => Ok(tx_hash),
                    None => self.submit_record(&adapter, &mut record).await,
                };
                match submitted {
                    Ok(tx_hash) => self.await_confirmation(&adapter, &record, &tx_hash).await,
                    Err(err) => Err(err),
                }
            },
            Err(err) => Err(err),
        };

        let settled = match outcome {
            Ok(confirmations) => self.settle_confirmed(record, confirmations).await,
            Err(err) if is_interrupt(&err) => {
                debug!("Anchoring interrupted, will resume on restart");
                Ok(())
            },
            Err(err) => self.settle_failed(record, &err).await,
        };
        if let Err(err) = settled {
            error!(error = %err, "Failed to record anchor outcome");
        }
    }

    /// Submit the job's payload reference and record the accepted transaction
    async fn submit_record(
        &self,
        adapter: &ChainAdapter,
        record: &mut ChainRecord,
    ) -> PipelineResult<String> {
        let payload = self.payload_ref(record.job_id).await?;
        let submission = adapter.submit(&payload, &self.inner.shutdown).await?;

        record.tx_hash = Some(submission.tx_hash.clone());
        record.attempts += i64::from(submission.attempts);
        record.status = ChainRecordStatus::Pending;
        record.confirmations = 0;
        record.error = None;
        record.submitted_at = Some(Utc::now());
        self.inner.ledger.upsert_chain_record(record).await?;
        Ok(submission.tx_hash)
    }

    async fn await_confirmation(
        &self,
        adapter: &ChainAdapter,
        record: &ChainRecord,
        tx_hash: &str,
    ) -> PipelineResult<u64> {
        let job_id = record.job_id;
        let network = record.network;
        let state = self.load(job_id).await?.state;
        let required = adapter.required_confirmations();
        let events = self.inner.events.clone();

        adapter
            .wait_for_confirmation(tx_hash, &self.inner.shutdown, move |confirmations| {
                let _ = events.send(ProgressEvent::confirmation(
                    job_id,
                    state,
                    network,
                    confirmations,
                    required,
                ));
            })
            .await
            .map_err(|err| match err {
                ConfirmationError::Cancelled => PipelineError::Cancelled(job_id),
                other => other.into(),
            })
    }

    /// Mark the record confirmed; a job still in `Anchoring` becomes
    /// `Confirmed` in the same ledger transaction
    async fn settle_confirmed(&self, mut record: ChainRecord, confirmations: u64) -> PipelineResult<()> {
        record.status = ChainRecordStatus::Confirmed;
        record.confirmations = confirmations as i64;
        record.error = None;

        let job = self.load(record.job_id).await?;
        if job.state == JobState::Anchoring {
            let detail = format!(
                "confirmed on {} in {}",
                record.network,
                record.tx_hash.as_deref().unwrap_or_default()
            );
            match self
                .advance(&job, JobState::Confirmed, Some(detail), StageRecords::Chain(&record))
                .await
            {
                Ok(_) => {
                    info!(confirmations, "Job confirmed");
                    return Ok(());
                },
                Err(PipelineError::Superseded(_)) => {},
                Err(err) => return Err(err),
            }
        }

        self.inner.ledger.upsert_chain_record(&record).await?;
        let required = self
            .adapter(record.network)
            .map(|adapter| adapter.required_confirmations())
            .unwrap_or(confirmations);
        let current = self.load(record.job_id).await?;
        self.publish(ProgressEvent::confirmation(
            record.job_id,
            current.state,
            record.network,
            confirmations,
            required,
        ));
        info!(confirmations, "Additional anchor confirmed");
        Ok(())
    }

    async fn settle_failed(&self, mut record: ChainRecord, err: &PipelineError) -> PipelineResult<()> {
        warn!(error = %err, "Anchoring failed");
        match err {
            PipelineError::Submission(ChainSubmissionError::Exhausted { attempts, .. }) => {
                record.attempts += i64::from(*attempts)
            },
            PipelineError::Submission(ChainSubmissionError::Rejected { .. }) => record.attempts += 1,
            _ => {},
        }
        record.status = ChainRecordStatus::Failed;
        record.error = Some(err.to_string());
        self.inner.ledger.upsert_chain_record(&record).await?;
        self.anchoring_settled(record.job_id, err.to_string()).await
    }

    /// Fail a job in `Anchoring` once none of its anchors can still confirm
    pub(super) async fn anchoring_settled(&self, job_id: Uuid, reason: String) -> PipelineResult<()> {
        let job = self.load(job_id).await?;
        if job.state != JobState::Anchoring {
            return Ok(());
        }
        let records = self.inner.ledger.chain_records(job_id).await?;
        if records.iter().any(|r| r.status != ChainRecordStatus::Failed) {
            return Ok(());
        }

        match self
            .advance(&job, JobState::Failed, Some(reason), StageRecords::None)
            .await
        {
            Ok(failed) => {
                warn!(job_id = %job_id, "Job failed while anchoring");
                self.schedule_retry(&failed);
                Ok(())
            },
            Err(PipelineError::Superseded(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Under the auto policy, resubmit a job that failed while anchoring after
    /// the cooldown, up to the configured number of rounds
    pub(super) fn schedule_retry(&self, job: &Job) -> bool {
        let config = &self.inner.config;
        if config.failed_job_policy != FailedJobPolicy::Auto
            || job.failed_stage != Some(JobState::Anchoring)
        {
            return false;
        }

        let this = self.clone();
        let job_id = job.id;
        let network = job.network;
        let limit = i64::from(config.auto_retry_limit);
        let cooldown = Duration::from_secs(config.auto_retry_cooldown_secs);
        let span = info_span!("auto_retry", job_id = %job_id, network = %network);

        self.inner.tracker.spawn(
            async move {
                let rounds = match this
                    .inner
                    .ledger
                    .count_transitions(job_id, JobState::Failed, JobState::Anchoring)
                    .await
                {
                    Ok(rounds) => rounds,
                    Err(err) => {
                        warn!(error = %err, "Could not count previous retries");
                        return;
                    },
                };
                if rounds >= limit {
                    info!(rounds, "Automatic retry limit reached, job stays failed");
                    return;
                }

                tokio::select! {
                    _ = this.inner.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(cooldown) => {},
                }

                match this.store(job_id, network).await {
                    Ok(tx_hash) => info!(tx_hash = %tx_hash, round = rounds + 1, "Job resubmitted"),
                    Err(err) => warn!(error = %err, "Automatic resubmission failed"),
                }
            }
            .instrument(span),
        );
        true
    }

    /// Anchor a job on `network` and return the transaction hash once the
    /// network accepted it. Confirmation is tracked in the background.
    ///
    /// Works for confirmed jobs (additional network), jobs still anchoring
    /// (another round) and jobs that failed while anchoring (resubmission).
    #[instrument(skip(self))]
    pub async fn store(&self, job_id: Uuid, network: Network) -> PipelineResult<String> {
        let adapter = self.adapter(network)?;
        let job = self.load(job_id).await?;
        let existing = self.inner.ledger.chain_record(job_id, network).await?;

        if matches!(job.state, JobState::Confirmed | JobState::Anchoring) {
            if let Some(tx_hash) = existing
                .as_ref()
                .filter(|r| r.status != ChainRecordStatus::Failed)
                .and_then(|r| r.tx_hash.clone())
            {
                return Ok(tx_hash);
            }
        }

        let anchorable = match job.state {
            JobState::Confirmed | JobState::Anchoring => true,
            JobState::Failed => job.failed_stage == Some(JobState::Anchoring),
            _ => false,
        };
        if !anchorable {
            return Err(PipelineError::InvalidState {
                job_id,
                state: job.state,
                reason: "the job has no encrypted payload ready to anchor".to_string(),
            });
        }

        let slot = AnchorSlot::claim(&self.inner, job_id, network).ok_or_else(|| {
            PipelineError::InvalidState {
                job_id,
                state: job.state,
                reason: format!("a submission to {} is already in flight", network),
            }
        })?;

        let mut record = ChainRecord::pending(job_id, network);
        record.attempts = existing.as_ref().map(|r| r.attempts).unwrap_or_default();

        if job.state == JobState::Confirmed {
            self.inner.ledger.upsert_chain_record(&record).await?;
        } else {
            let detail = format!("anchoring on {}", network);
            self.advance(&job, JobState::Anchoring, Some(detail), StageRecords::Chain(&record))
                .await?;
        }

        match self.submit_record(&adapter, &mut record).await {
            Ok(tx_hash) => {
                self.spawn_anchor_task(slot, record);
                Ok(tx_hash)
            },
            Err(err) => {
                if !is_interrupt(&err) {
                    self.settle_failed(record, &err).await?;
                }
                Err(err)
            },
        }
    }

    /// Read an anchor transaction back and decrypt the payload it points to.
    /// Without `network` the transaction is looked up in the ledger.
    #[instrument(skip(self))]
    pub async fn retrieve(&self, tx_hash: &str, network: Option<Network>) -> PipelineResult<Retrieved> {
        let network = match network {
            Some(network) => network,
            None => self
                .inner
                .ledger
                .find_chain_record_by_tx(tx_hash)
                .await?
                .map(|record| record.network)
                .ok_or_else(|| PipelineError::TransactionNotFound(tx_hash.to_string()))?,
        };
        let adapter = self.adapter(network)?;

        let payload = adapter.retrieve(tx_hash).await.map_err(|err| match err {
            ChainError::NotFound(_) => PipelineError::TransactionNotFound(tx_hash.to_string()),
            other => other.into(),
        })?;

        if !self.inner.storage.exists(&payload.location).await? {
            return Err(PipelineError::PayloadMissing(tx_hash.to_string()));
        }
        let cipher_text = self.inner.storage.get(&payload.location).await?;
        verify_sha256(&cipher_text, &payload.content_hash)
            .map_err(|e| PipelineError::Integrity(format!("stored payload: {}", e)))?;

        let tier = EncryptionTier::from_algorithm(&payload.algorithm)?;
        let json = self
            .inner
            .crypto
            .decrypt(payload.job_id, cipher_text, &payload.key_id, tier)
            .await?;

        debug!(job_id = %payload.job_id, bytes = json.len(), "Payload retrieved");
        Ok(Retrieved {
            job_id: payload.job_id,
            network,
            tx_hash: tx_hash.to_string(),
            json,
        })
    }

    async fn payload_ref(&self, job_id: Uuid) -> PipelineResult<PayloadRef> {
        let payload = self.inner.ledger.payload(job_id).await?.ok_or_else(|| {
            PipelineError::Integrity(format!("job {} has no encrypted payload", job_id))
        })?;
        Ok(PayloadRef {
            job_id,
            content_hash: payload.content_hash,
            location: payload.location,
            key_id: payload.key_id,
            algorithm: payload.algorithm,
        })
    }
}

/// Server shutdown, not a verdict on the anchor
fn is_interrupt(err: &PipelineError) -> bool {
    matches!(
        err,
        PipelineError::Cancelled(_) | PipelineError::Submission(ChainSubmissionError::Cancelled)
    )
}
