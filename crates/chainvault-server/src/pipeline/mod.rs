//! Job Orchestrator
//!
//! Drives every upload through `Queued → Parsing → Converting → Encrypting →
//! Anchoring → Confirmed`. Each job runs as its own task; parsing, conversion
//! and encryption hold a permit from a bounded worker pool while anchoring
//! does not. Every transition is committed to the [`Ledger`] before it is
//! published as a [`ProgressEvent`].
//!
//! # Cancellation
//!
//! A job can be cancelled until it reaches `Anchoring`. The ledger is updated
//! first and the job's [`CancellationToken`] fired afterwards, so a stage that
//! finishes concurrently loses the version check and its output is discarded.
//! Anchor tasks only observe the server shutdown token.

mod anchor;
mod error;
mod events;
mod stages;

use chainvault_common::types::SourceFormat;
use chainvault_convert::Spool;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

pub use error::{PipelineError, PipelineResult};
pub use events::{EventKind, ProgressEvent, EVENT_CHANNEL_CAPACITY};

use crate::chain::{ChainAdapter, ChainRegistry, Network};
use crate::config::{FailedJobPolicy, PipelineConfig};
use crate::crypto::{EncryptionLayer, EncryptionTier};
use crate::ledger::{JobFilter, Ledger, LedgerConflictError, LedgerResult};
use crate::models::{
    ChainRecord, ChainRecordStatus, ConvertedArtifact, EncryptedPayloadRecord, Job, JobState,
    NewJob, SourceFile,
};
use crate::storage::{self, ArtifactStore};

/// A file accepted by the upload endpoint, not yet a job
pub struct Upload {
    pub file_name: String,
    pub format: SourceFormat,
    pub network: Network,
    pub tier: EncryptionTier,
    pub infer_types: bool,
    pub data: Spool,
    /// SHA-256 of `data`, computed while receiving it
    pub checksum: String,
}

/// Job detail as reported by the status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ConvertedArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<EncryptedPayloadRecord>,
    pub chain_records: Vec<ChainRecord>,
}

#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled(Job),
    /// The job had already failed or been cancelled
    AlreadyTerminal(Job),
}

#[derive(Debug, Clone)]
pub enum DeleteOutcome {
    /// The job was still running and has been cancelled; its record is kept
    Cancelled(Job),
    Deleted,
}

/// Decrypted content read back through an anchor transaction
#[derive(Debug, Clone)]
pub struct Retrieved {
    pub job_id: Uuid,
    pub network: Network,
    pub tx_hash: String,
    pub json: Vec<u8>,
}

/// What [`Orchestrator::recover`] picked back up after a restart
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub resumed: usize,
    pub cancelled: usize,
    pub anchors_resumed: usize,
    pub anchoring_failed: usize,
    pub retries_scheduled: usize,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    ledger: Ledger,
    storage: ArtifactStore,
    crypto: EncryptionLayer,
    chains: ChainRegistry,
    config: PipelineConfig,
    workers: Arc<Semaphore>,
    events: broadcast::Sender<ProgressEvent>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    /// Cancellation tokens of jobs with a running stage task
    jobs: Mutex<HashMap<Uuid, CancellationToken>>,
    /// (job, network) pairs with an anchor task in flight
    anchors: Mutex<HashSet<(Uuid, Network)>>,
}

/// Exclusive right to anchor one job on one network, released on drop
struct AnchorSlot {
    inner: Arc<Inner>,
    key: (Uuid, Network),
}

impl AnchorSlot {
    fn claim(inner: &Arc<Inner>, job_id: Uuid, network: Network) -> Option<Self> {
        let key = (job_id, network);
        if !lock(&inner.anchors).insert(key) {
            return None;
        }
        Some(Self {
            inner: Arc::clone(inner),
            key,
        })
    }
}

impl Drop for AnchorSlot {
    fn drop(&mut self) {
        lock(&self.inner.anchors).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records written in the same ledger transaction as a state change
enum StageRecords<'a> {
    None,
    Artifact(&'a ConvertedArtifact),
    Payload(&'a EncryptedPayloadRecord, &'a ChainRecord),
    Chain(&'a ChainRecord),
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workers", &self.inner.config.workers)
            .field("networks", &self.inner.chains.networks().collect::<Vec<_>>())
            .field("storage", &self.inner.storage.kind())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        ledger: Ledger,
        storage: ArtifactStore,
        crypto: EncryptionLayer,
        chains: ChainRegistry,
        config: PipelineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                workers: Arc::new(Semaphore::new(config.workers.max(1))),
                ledger,
                storage,
                crypto,
                chains,
                config,
                events,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                jobs: Mutex::new(HashMap::new()),
                anchors: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.inner.ledger
    }

    pub fn storage(&self) -> &ArtifactStore {
        &self.inner.storage
    }

    pub fn chains(&self) -> &ChainRegistry {
        &self.inner.chains
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Progress events for every committed transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.events.subscribe()
    }

    /// Cancelled once [`Orchestrator::shutdown`] starts
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Store the upload, record the job as `Queued` and start it
    #[instrument(skip(self, upload), fields(file = %upload.file_name, format = %upload.format, network = %upload.network))]
    pub async fn submit(&self, upload: Upload) -> PipelineResult<Job> {
        if !self.inner.chains.is_enabled(upload.network) {
            return Err(PipelineError::NetworkDisabled(upload.network));
        }
        if upload.data.is_empty() {
            return Err(PipelineError::Validation("Uploaded file is empty".to_string()));
        }

        let id = Uuid::new_v4();
        let location = storage::upload_key(id, &upload.file_name);
        let size = self
            .inner
            .storage
            .put_spool(&location, upload.data, source_content_type(upload.format))
            .await?;

        let new_job = NewJob {
            id,
            source_file: SourceFile {
                name: upload.file_name,
                format: upload.format,
                size: size as i64,
                checksum: upload.checksum,
                location: location.clone(),
            },
            network: upload.network,
            encryption_tier: upload.tier,
            infer_types: upload.infer_types,
        };

        let job = match self.inner.ledger.create_job(&new_job).await {
            Ok(job) => job,
            Err(err) => {
                self.discard_object(&location).await;
                return Err(err.into());
            },
        };

        info!(job_id = %job.id, size, "Job accepted");
        self.publish(ProgressEvent::transition(&job, None));
        self.spawn_job(job.clone());
        Ok(job)
    }

    pub async fn status(&self, job_id: Uuid) -> PipelineResult<JobState> {
        Ok(self.load(job_id).await?.state)
    }

    /// Job together with its stage outputs and chain records
    pub async fn job_view(&self, job_id: Uuid) -> PipelineResult<JobView> {
        let job = self.load(job_id).await?;
        let ledger = &self.inner.ledger;
        let artifact = ledger.artifact(job_id).await?;
        let payload = ledger.payload(job_id).await?;
        let chain_records = ledger.chain_records(job_id).await?;

        let progress = match (job.state, chain_records.iter().find(|r| r.network == job.network)) {
            (JobState::Anchoring, Some(record)) => {
                let required = self
                    .inner
                    .chains
                    .get(record.network)
                    .map(|adapter| adapter.required_confirmations())
                    .unwrap_or_else(|| record.network.default_confirmations());
                ProgressEvent::confirmation(
                    job.id,
                    job.state,
                    record.network,
                    record.confirmations.max(0) as u64,
                    required,
                )
                .progress
            },
            (state, _) => state.progress(),
        };

        Ok(JobView {
            job,
            progress,
            artifact,
            payload,
            chain_records,
        })
    }

    pub async fn list(&self, filter: &JobFilter) -> PipelineResult<(Vec<Job>, i64)> {
        Ok(self.inner.ledger.list_jobs(filter).await?)
    }

    /// Cancel a job that has not started anchoring
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: Uuid) -> PipelineResult<CancelOutcome> {
        let mut job = self.load(job_id).await?;
        let mut conflicts = 0;

        loop {
            match job.state {
                JobState::Failed | JobState::Cancelled => {
                    return Ok(CancelOutcome::AlreadyTerminal(job))
                },
                state if !state.is_cancellable() => {
                    return Err(PipelineError::NotCancellable { job_id, state })
                },
                _ => {},
            }

            if !job.cancel_requested {
                self.inner.ledger.request_cancel(job_id).await?;
                job.cancel_requested = true;
            }

            match self
                .inner
                .ledger
                .transition(&job, JobState::Cancelled, Some("cancelled by user".to_string()))
                .await
            {
                Ok(cancelled) => {
                    info!(from = %job.state, "Job cancelled");
                    self.publish(ProgressEvent::transition(&cancelled, Some(job.state)));
                    if let Some(token) = lock(&self.inner.jobs).get(&job_id) {
                        token.cancel();
                    }
                    return Ok(CancelOutcome::Cancelled(cancelled));
                },
                Err(err) if err.is_conflict() && conflicts < self.inner.config.conflict_retries => {
                    conflicts += 1;
                    debug!(conflicts, "Cancel raced a stage transition, re-reading");
                    job = self.load(job_id).await?;
                },
                Err(err) => return Err(PipelineError::from_ledger(err, job_id)),
            }
        }
    }

    /// Cancel a running job, or remove a finished one with its stored objects.
    ///
    /// The encrypted payload and its key survive unless `permanent` is set, so
    /// existing anchors stay retrievable by transaction hash and network.
    #[instrument(skip(self))]
    pub async fn delete(&self, job_id: Uuid, permanent: bool) -> PipelineResult<DeleteOutcome> {
        let mut job = self.load(job_id).await?;
        if job.state.is_cancellable() {
            match self.cancel(job_id).await? {
                CancelOutcome::Cancelled(cancelled) => return Ok(DeleteOutcome::Cancelled(cancelled)),
                CancelOutcome::AlreadyTerminal(current) => job = current,
            }
        }

        if job.state == JobState::Anchoring {
            return Err(PipelineError::InvalidState {
                job_id,
                state: job.state,
                reason: "anchoring is in progress".to_string(),
            });
        }
        let records = self.inner.ledger.chain_records(job_id).await?;
        if let Some(pending) = records.iter().find(|r| r.status == ChainRecordStatus::Pending) {
            return Err(PipelineError::InvalidState {
                job_id,
                state: job.state,
                reason: format!("an anchor on {} is still pending", pending.network),
            });
        }
        if self.anchor_in_flight(job_id) {
            return Err(PipelineError::InvalidState {
                job_id,
                state: job.state,
                reason: "an anchor submission is in flight".to_string(),
            });
        }

        let storage = &self.inner.storage;
        storage.delete(&job.source_file.location).await?;
        storage.delete(&storage::artifact_key(job_id)).await?;
        if permanent {
            storage.delete(&storage::payload_key(job_id)).await?;
            if let Some(payload) = self.inner.ledger.payload(job_id).await? {
                self.inner.crypto.destroy_key(&payload.key_id).await?;
            }
        }

        self.inner.ledger.delete_job(job_id).await?;
        info!(permanent, "Job deleted");
        Ok(DeleteOutcome::Deleted)
    }

    /// Pick up unfinished work after a restart
    #[instrument(skip(self))]
    pub async fn recover(&self) -> PipelineResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let ledger = &self.inner.ledger;

        for state in [
            JobState::Queued,
            JobState::Parsing,
            JobState::Converting,
            JobState::Encrypting,
        ] {
            for job in ledger.jobs_in_state(state).await? {
                if job.cancel_requested {
                    match self.cancel(job.id).await {
                        Ok(_) => report.cancelled += 1,
                        Err(err) => warn!(job_id = %job.id, error = %err, "Could not finish cancellation"),
                    }
                    continue;
                }
                self.spawn_job(job);
                report.resumed += 1;
            }
        }

        for record in ledger.pending_chain_records().await? {
            if self.spawn_anchor(record) {
                report.anchors_resumed += 1;
            }
        }

        for job in ledger.jobs_in_state(JobState::Anchoring).await? {
            if !self.anchor_in_flight(job.id) {
                self.anchoring_settled(job.id, "no anchor submission was pending at restart".to_string())
                    .await?;
                report.anchoring_failed += 1;
            }
        }

        if self.inner.config.failed_job_policy == FailedJobPolicy::Auto {
            for job in ledger.jobs_in_state(JobState::Failed).await? {
                if self.schedule_retry(&job) {
                    report.retries_scheduled += 1;
                }
            }
        }

        info!(
            resumed = report.resumed,
            cancelled = report.cancelled,
            anchors_resumed = report.anchors_resumed,
            anchoring_failed = report.anchoring_failed,
            retries_scheduled = report.retries_scheduled,
            "Recovery finished"
        );
        Ok(report)
    }

    /// Stop all job and anchor tasks. Returns false if they did not finish in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        let finished = tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_ok();
        if !finished {
            warn!(timeout_secs = timeout.as_secs(), "Pipeline tasks still running at shutdown");
        }
        finished
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn load(&self, job_id: Uuid) -> PipelineResult<Job> {
        self.inner
            .ledger
            .get_job(job_id)
            .await
            .map_err(|err| PipelineError::from_ledger(err, job_id))
    }

    fn adapter(&self, network: Network) -> PipelineResult<Arc<ChainAdapter>> {
        self.inner
            .chains
            .get(network)
            .ok_or(PipelineError::NetworkDisabled(network))
    }

    fn publish(&self, event: ProgressEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn anchor_in_flight(&self, job_id: Uuid) -> bool {
        lock(&self.inner.anchors).iter().any(|(id, _)| *id == job_id)
    }

    fn spawn_job(&self, job: Job) {
        let token = self.inner.shutdown.child_token();
        lock(&self.inner.jobs).insert(job.id, token.clone());

        let this = self.clone();
        let span = info_span!("job", job_id = %job.id);
        self.inner.tracker.spawn(
            async move {
                let job_id = job.id;
                match this.drive(job, &token).await {
                    Ok(()) => {},
                    Err(PipelineError::Cancelled(_)) | Err(PipelineError::Superseded(_)) => {
                        debug!("Job task stopped")
                    },
                    Err(err) => error!(error = %err, "Job task aborted"),
                }
                lock(&this.inner.jobs).remove(&job_id);
            }
            .instrument(span),
        );
    }

    /// Run stages until the job is terminal or handed over to anchoring
    async fn drive(&self, mut job: Job, token: &CancellationToken) -> PipelineResult<()> {
        loop {
            match job.state {
                JobState::Queued | JobState::Parsing | JobState::Converting | JobState::Encrypting => {
                    let workers = Arc::clone(&self.inner.workers);
                    let _permit = tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(PipelineError::Cancelled(job.id)),
                        permit = workers.acquire_owned() => permit
                            .map_err(|e| PipelineError::Task(e.to_string()))?,
                    };

                    let next = tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(PipelineError::Cancelled(job.id)),
                        next = self.run_stage(&job) => next?,
                    };
                    job = next;
                },
                JobState::Anchoring => {
                    self.start_anchoring(&job).await?;
                    return Ok(());
                },
                JobState::Confirmed | JobState::Failed | JobState::Cancelled => return Ok(()),
            }
        }
    }

    /// Commit `job -> to` with its stage records, re-reading on version
    /// conflicts as long as the job is still in the same state
    async fn advance(
        &self,
        job: &Job,
        to: JobState,
        detail: Option<String>,
        records: StageRecords<'_>,
    ) -> PipelineResult<Job> {
        let mut current = job.clone();
        let mut conflicts = 0;

        loop {
            match self.commit_transition(&current, to, detail.clone(), &records).await {
                Ok(next) => {
                    self.publish(ProgressEvent::transition(&next, Some(current.state)));
                    return Ok(next);
                },
                Err(err) if err.is_conflict() => {
                    let fresh = self.load(job.id).await?;
                    if fresh.state != current.state {
                        debug!(expected = %current.state, found = %fresh.state, "Job moved on, dropping stage result");
                        return Err(PipelineError::Superseded(job.id));
                    }
                    if conflicts >= self.inner.config.conflict_retries {
                        return Err(PipelineError::Ledger(
                            LedgerConflictError {
                                job_id: job.id,
                                expected: current.version,
                            }
                            .into(),
                        ));
                    }
                    conflicts += 1;
                    current = fresh;
                },
                Err(err) => return Err(PipelineError::from_ledger(err, job.id)),
            }
        }
    }

    async fn commit_transition(
        &self,
        job: &Job,
        to: JobState,
        detail: Option<String>,
        records: &StageRecords<'_>,
    ) -> LedgerResult<Job> {
        let mut staged = self.inner.ledger.begin_transition(job, to, detail).await?;
        match records {
            StageRecords::None => {},
            StageRecords::Artifact(artifact) => staged.record_artifact(artifact).await?,
            StageRecords::Payload(payload, chain) => {
                staged.record_payload(payload).await?;
                staged.record_chain(chain).await?;
            },
            StageRecords::Chain(chain) => staged.record_chain(chain).await?,
        }
        staged.commit().await
    }

    async fn discard_object(&self, key: &str) {
        if let Err(err) = self.inner.storage.delete(key).await {
            warn!(key, error = %err, "Failed to remove orphaned object");
        }
    }

    async fn discard_key(&self, key_id: &str) {
        if let Err(err) = self.inner.crypto.destroy_key(key_id).await {
            warn!(key_id, error = %err, "Failed to destroy orphaned key");
        }
    }
}

fn source_content_type(format: SourceFormat) -> &'static str {
    match format {
        SourceFormat::Csv => "text/csv",
        SourceFormat::Sql => "application/sql",
    }
}
