//! End-to-end pipeline tests against simulated chains
//!
//! Coverage includes:
//! - Happy path through every state with the transition history
//! - Parse failures recorded against the failing stage
//! - Transient submission failures below and at the retry limit
//! - Rejected and reverted anchors, manual and automatic resubmission
//! - Cancellation before and after anchoring begins
//! - Anchoring on additional networks and retrieval by transaction hash
//! - Deletion with and without payload destruction

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use chainvault_common::types::SourceFormat;
use chainvault_server::{
    chain::Network,
    config::FailedJobPolicy,
    crypto::CryptoError,
    models::{ChainRecordStatus, JobState, NewJob, SourceFile},
    pipeline::{CancelOutcome, DeleteOutcome, EventKind, PipelineError},
    storage,
};
use common::{TestEnv, PEOPLE_CSV, PEOPLE_JSON, TEST_CONFIRMATIONS};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_csv_job_reaches_confirmed() {
    let env = TestEnv::start().await;
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    assert_eq!(job.state, JobState::Queued);

    let job = env.wait_for_state(job.id, JobState::Confirmed).await;
    assert!(job.error.is_none());

    let history: Vec<_> = env
        .ledger
        .transitions(job.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.to_state)
        .collect();
    assert_eq!(
        history,
        vec![
            JobState::Queued,
            JobState::Parsing,
            JobState::Converting,
            JobState::Encrypting,
            JobState::Anchoring,
            JobState::Confirmed,
        ]
    );

    let artifact = env.ledger.artifact(job.id).await.unwrap().expect("artifact");
    assert_eq!(artifact.row_count, 3);
    let json = env.storage.get(&artifact.location).await.unwrap();
    assert_eq!(String::from_utf8(json).unwrap(), PEOPLE_JSON);

    let records = env.ledger.chain_records(job.id).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.network, Network::Ethereum);
    assert_eq!(record.status, ChainRecordStatus::Confirmed);
    assert!(record.confirmations >= TEST_CONFIRMATIONS as i64);
    assert_eq!(record.attempts, 1);
}

#[tokio::test]
async fn test_payload_on_disk_is_not_plaintext() {
    let env = TestEnv::start().await;
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Confirmed).await;

    let payload = env.ledger.payload(job.id).await.unwrap().expect("payload");
    let cipher_text = env.storage.get(&payload.location).await.unwrap();
    assert!(!cipher_text
        .windows(PEOPLE_JSON.len())
        .any(|w| w == PEOPLE_JSON.as_bytes()));
    assert_eq!(payload.algorithm, "AES-256-GCM");
}

#[tokio::test]
async fn test_sql_job_with_type_inference() {
    let env = TestEnv::start().await;
    let mut upload = common::upload(
        "dump.sql",
        SourceFormat::Sql,
        b"CREATE TABLE t (id INT, name TEXT);\nINSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b');",
    );
    upload.infer_types = true;
    upload.network = Network::Polygon;

    let job = env.orchestrator.submit(upload).await.unwrap();
    let job = env.wait_for_state(job.id, JobState::Confirmed).await;
    assert_eq!(job.network, Network::Polygon);

    let artifact = env.ledger.artifact(job.id).await.unwrap().unwrap();
    assert_eq!(artifact.table_count, 1);
    assert_eq!(artifact.row_count, 2);
    assert_eq!(env.chain(Network::Polygon).transaction_count(), 1);
    assert_eq!(env.chain(Network::Ethereum).transaction_count(), 0);
}

#[tokio::test]
async fn test_progress_events_follow_the_state_machine() {
    let env = TestEnv::start().await;
    let mut events = env.orchestrator.subscribe();
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;

    let mut states = Vec::new();
    let mut last_progress = 0;
    tokio::time::timeout(common::WAIT_TIMEOUT, async {
        loop {
            let event = events.recv().await.unwrap();
            if event.job_id != job.id {
                continue;
            }
            assert!(event.progress >= last_progress, "progress went backwards");
            last_progress = event.progress;
            if event.kind == EventKind::Transition {
                states.push(event.state);
                if event.state == JobState::Confirmed {
                    break;
                }
            }
        }
    })
    .await
    .expect("job confirmed");

    assert_eq!(states.first(), Some(&JobState::Queued));
    assert_eq!(states.last(), Some(&JobState::Confirmed));
    assert_eq!(last_progress, 100);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_malformed_sql_fails_in_parsing() {
    let env = TestEnv::start().await;
    let job = env
        .orchestrator
        .submit(common::upload(
            "broken.sql",
            SourceFormat::Sql,
            b"INSERT INTO t (a) VALUES ('unterminated);",
        ))
        .await
        .unwrap();

    let job = env.wait_for_state(job.id, JobState::Failed).await;
    assert_eq!(job.failed_stage, Some(JobState::Parsing));
    assert!(job.error.is_some());
    assert!(env.ledger.artifact(job.id).await.unwrap().is_none());
    assert_eq!(env.chain(Network::Ethereum).send_attempts(), 0);
}

#[tokio::test]
async fn test_transient_failures_below_limit_still_confirm() {
    let env = TestEnv::start().await;
    // Three attempts allowed: two failures then success
    env.chain(Network::Ethereum).fail_next(2);

    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Confirmed).await;

    let record = env
        .ledger
        .chain_record(job.id, Network::Ethereum)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(env.chain(Network::Ethereum).send_attempts(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_then_manual_resubmit_confirms() {
    let env = TestEnv::start().await;
    env.chain(Network::Ethereum).fail_next(3);

    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    let failed = env.wait_for_state(job.id, JobState::Failed).await;
    assert_eq!(failed.failed_stage, Some(JobState::Anchoring));

    let record = env
        .ledger
        .chain_record(job.id, Network::Ethereum)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ChainRecordStatus::Failed);
    assert_eq!(record.attempts, 3);
    assert!(record.tx_hash.is_none());

    // Manual policy: nothing happens until asked
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(env.orchestrator.status(job.id).await.unwrap(), JobState::Failed);

    let tx_hash = env.orchestrator.store(job.id, Network::Ethereum).await.unwrap();
    let job = env.wait_for_state(job.id, JobState::Confirmed).await;
    let record = env
        .ledger
        .chain_record(job.id, Network::Ethereum)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.tx_hash.as_deref(), Some(tx_hash.as_str()));
    assert_eq!(record.attempts, 4);
}

#[tokio::test]
async fn test_rejected_submission_is_not_retried() {
    let env = TestEnv::start().await;
    env.chain(Network::Ethereum).reject_next();

    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    let job = env.wait_for_state(job.id, JobState::Failed).await;
    assert_eq!(job.failed_stage, Some(JobState::Anchoring));
    assert_eq!(env.chain(Network::Ethereum).send_attempts(), 1);
}

#[tokio::test]
async fn test_reverted_anchor_fails_the_job() {
    let env = TestEnv::start().await;
    env.chain(Network::Ethereum).revert_next();

    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    let job = env.wait_for_state(job.id, JobState::Failed).await;
    let record = env
        .ledger
        .chain_record(job.id, Network::Ethereum)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ChainRecordStatus::Failed);
    assert!(record.tx_hash.is_some());
    assert!(record.error.unwrap().contains("reverted"));
}

#[tokio::test]
async fn test_auto_policy_resubmits_after_anchoring_failure() {
    let env = TestEnv::with_config(|config| {
        config.pipeline.failed_job_policy = FailedJobPolicy::Auto;
        config.pipeline.auto_retry_limit = 2;
    })
    .await;
    env.chain(Network::Ethereum).fail_next(3);

    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;

    // Passes through Failed, so poll for the final state directly
    tokio::time::timeout(common::WAIT_TIMEOUT, async {
        loop {
            if env.orchestrator.status(job.id).await.unwrap() == JobState::Confirmed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("auto retry confirmed the job");

    let rounds = env
        .ledger
        .count_transitions(job.id, JobState::Failed, JobState::Anchoring)
        .await
        .unwrap();
    assert_eq!(rounds, 1);
}

#[tokio::test]
async fn test_auto_policy_stops_at_retry_limit() {
    let env = TestEnv::with_config(|config| {
        config.pipeline.failed_job_policy = FailedJobPolicy::Auto;
        config.pipeline.auto_retry_limit = 1;
    })
    .await;
    // Enough outages for the first run and the single automatic round
    env.chain(Network::Ethereum).fail_next(6);

    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    tokio::time::timeout(common::WAIT_TIMEOUT, async {
        loop {
            let rounds = env
                .ledger
                .count_transitions(job.id, JobState::Failed, JobState::Anchoring)
                .await
                .unwrap();
            let state = env.orchestrator.status(job.id).await.unwrap();
            if rounds == 1 && state == JobState::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job failed again after one automatic round");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(env.orchestrator.status(job.id).await.unwrap(), JobState::Failed);
    assert_eq!(env.chain(Network::Ethereum).send_attempts(), 6);
}

// ============================================================================
// Cancellation
// ============================================================================

/// A queued job the orchestrator has not picked up
async fn queued_job(env: &TestEnv) -> Uuid {
    let id = Uuid::new_v4();
    let location = storage::upload_key(id, "queued.csv");
    env.storage
        .put_bytes(&location, PEOPLE_CSV.to_vec(), "text/csv")
        .await
        .unwrap();
    env.ledger
        .create_job(&NewJob {
            id,
            source_file: SourceFile {
                name: "queued.csv".to_string(),
                format: SourceFormat::Csv,
                size: PEOPLE_CSV.len() as i64,
                checksum: chainvault_common::checksum::sha256_hex(PEOPLE_CSV),
                location,
            },
            network: Network::Ethereum,
            encryption_tier: Default::default(),
            infer_types: false,
        })
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn test_cancel_before_anchoring() {
    let env = TestEnv::start().await;
    let job_id = queued_job(&env).await;

    match env.orchestrator.cancel(job_id).await.unwrap() {
        CancelOutcome::Cancelled(job) => assert_eq!(job.state, JobState::Cancelled),
        other => panic!("unexpected outcome {other:?}"),
    }

    // Idempotent on a cancelled job
    assert!(matches!(
        env.orchestrator.cancel(job_id).await.unwrap(),
        CancelOutcome::AlreadyTerminal(_)
    ));
    assert_eq!(env.chain(Network::Ethereum).send_attempts(), 0);
}

#[tokio::test]
async fn test_cancel_after_confirmation_is_rejected() {
    let env = TestEnv::start().await;
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Confirmed).await;

    let err = env.orchestrator.cancel(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::NotCancellable {
            state: JobState::Confirmed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cancel_during_anchoring_does_not_stop_the_anchor() {
    let env = TestEnv::start().await;
    let chain = env.chain(Network::Ethereum);
    chain.set_blocks_per_poll(0);

    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Anchoring).await;

    assert!(matches!(
        env.orchestrator.cancel(job.id).await,
        Err(PipelineError::NotCancellable { .. })
    ));

    chain.set_blocks_per_poll(4);
    env.wait_for_state(job.id, JobState::Confirmed).await;
}

// ============================================================================
// Additional networks and retrieval
// ============================================================================

#[tokio::test]
async fn test_store_on_additional_network_and_retrieve() {
    let env = TestEnv::start().await;
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Confirmed).await;

    let tx_hash = env.orchestrator.store(job.id, Network::Avalanche).await.unwrap();
    env.wait_for_record(job.id, Network::Avalanche, |r| {
        r.status == ChainRecordStatus::Confirmed
    })
    .await;

    // Storing again while the anchor stands returns the same transaction
    let again = env.orchestrator.store(job.id, Network::Avalanche).await.unwrap();
    assert_eq!(again, tx_hash);
    assert_eq!(env.chain(Network::Avalanche).transaction_count(), 1);

    assert_eq!(env.orchestrator.status(job.id).await.unwrap(), JobState::Confirmed);
    assert_eq!(env.ledger.chain_records(job.id).await.unwrap().len(), 2);

    let retrieved = env.orchestrator.retrieve(&tx_hash, None).await.unwrap();
    assert_eq!(retrieved.job_id, job.id);
    assert_eq!(retrieved.network, Network::Avalanche);
    assert_eq!(String::from_utf8(retrieved.json).unwrap(), PEOPLE_JSON);
}

#[tokio::test]
async fn test_store_requires_an_encrypted_payload() {
    let env = TestEnv::start().await;
    let job_id = queued_job(&env).await;

    assert!(matches!(
        env.orchestrator.store(job_id, Network::Ethereum).await,
        Err(PipelineError::InvalidState { .. })
    ));
    assert!(matches!(
        env.orchestrator.store(Uuid::new_v4(), Network::Ethereum).await,
        Err(PipelineError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_retrieve_unknown_transaction() {
    let env = TestEnv::start().await;
    let hash = format!("0x{}", "ab".repeat(32));

    assert!(matches!(
        env.orchestrator.retrieve(&hash, None).await,
        Err(PipelineError::TransactionNotFound(_))
    ));
    assert!(matches!(
        env.orchestrator.retrieve(&hash, Some(Network::Bsc)).await,
        Err(PipelineError::TransactionNotFound(_))
    ));
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn test_delete_keeps_payload_retrievable_by_network() {
    let env = TestEnv::start().await;
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Confirmed).await;
    let tx_hash = env
        .ledger
        .chain_record(job.id, Network::Ethereum)
        .await
        .unwrap()
        .unwrap()
        .tx_hash
        .unwrap();

    assert!(matches!(
        env.orchestrator.delete(job.id, false).await.unwrap(),
        DeleteOutcome::Deleted
    ));
    assert!(env.ledger.find_job(job.id).await.unwrap().is_none());
    assert!(!env.storage.exists(&storage::artifact_key(job.id)).await.unwrap());

    // The ledger no longer knows the transaction, the chain still does
    assert!(matches!(
        env.orchestrator.retrieve(&tx_hash, None).await,
        Err(PipelineError::TransactionNotFound(_))
    ));
    let retrieved = env
        .orchestrator
        .retrieve(&tx_hash, Some(Network::Ethereum))
        .await
        .unwrap();
    assert_eq!(String::from_utf8(retrieved.json).unwrap(), PEOPLE_JSON);
}

#[tokio::test]
async fn test_permanent_delete_destroys_payload_and_key() {
    let env = TestEnv::start().await;
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Confirmed).await;
    let payload = env.ledger.payload(job.id).await.unwrap().unwrap();
    let tx_hash = env
        .ledger
        .chain_record(job.id, Network::Ethereum)
        .await
        .unwrap()
        .unwrap()
        .tx_hash
        .unwrap();

    env.orchestrator.delete(job.id, true).await.unwrap();

    assert!(!env.storage.exists(&payload.location).await.unwrap());
    assert!(matches!(
        env.orchestrator
            .retrieve(&tx_hash, Some(Network::Ethereum))
            .await,
        Err(PipelineError::PayloadMissing(_))
    ));
    assert!(matches!(
        env.crypto
            .decrypt(job.id, vec![0; 64], &payload.key_id, payload.tier)
            .await,
        Err(CryptoError::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_running_job_cancels_it() {
    let env = TestEnv::start().await;
    let job_id = queued_job(&env).await;

    match env.orchestrator.delete(job_id, false).await.unwrap() {
        DeleteOutcome::Cancelled(job) => assert_eq!(job.state, JobState::Cancelled),
        DeleteOutcome::Deleted => panic!("running job must be cancelled, not deleted"),
    }
    assert!(env.ledger.find_job(job_id).await.unwrap().is_some());

    // A second delete removes the now terminal job
    assert!(matches!(
        env.orchestrator.delete(job_id, false).await.unwrap(),
        DeleteOutcome::Deleted
    ));
}

#[tokio::test]
async fn test_delete_while_anchoring_conflicts() {
    let env = TestEnv::start().await;
    let chain = env.chain(Network::Ethereum);
    chain.set_blocks_per_poll(0);

    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Anchoring).await;

    assert!(matches!(
        env.orchestrator.delete(job.id, false).await,
        Err(PipelineError::InvalidState {
            state: JobState::Anchoring,
            ..
        })
    ));
    chain.set_blocks_per_poll(4);
    env.wait_for_state(job.id, JobState::Confirmed).await;
}
