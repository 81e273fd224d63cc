//! Shared harness for ChainVault integration tests
//!
//! Builds a full pipeline on a temporary directory: a file-backed SQLite
//! ledger, local object storage, an in-memory key store and one simulated
//! chain per network with millisecond retry and polling intervals.
//!
//! ```no_run
//! mod common;
//! use common::TestEnv;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnv::start().await;
//!     let job = env.orchestrator.submit(common::csv_upload("a.csv", b"x\n1\n")).await.unwrap();
//!     env.wait_for_state(job.id, chainvault_server::models::JobState::Confirmed).await;
//! }
//! ```

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, response::Response, Router};
use chainvault_common::checksum::sha256_hex;
use chainvault_common::types::SourceFormat;
use chainvault_convert::Spool;
use chainvault_server::{
    api,
    chain::{
        adapter::{AdapterSettings, RetryPolicy},
        ChainAdapter, ChainBackend, ChainRegistry, Network, SimulatedChain,
    },
    config::Config,
    crypto::{EncryptionLayer, EncryptionTier, MemoryKeyStore},
    ledger::Ledger,
    models::{Job, JobState},
    pipeline::{Orchestrator, Upload},
    storage::ArtifactStore,
};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

/// Blocks a test waits for a job before giving up
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(15);

pub const PEOPLE_CSV: &[u8] = b"name,age\nA,1\nB,2\nC,";
pub const PEOPLE_JSON: &str =
    r#"[{"name":"A","age":"1"},{"name":"B","age":"2"},{"name":"C","age":null}]"#;

/// Confirmation depth used by every simulated network
pub const TEST_CONFIRMATIONS: u64 = 3;

pub fn fast_settings() -> AdapterSettings {
    AdapterSettings {
        confirmations: TEST_CONFIRMATIONS,
        retry: RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        },
        rate_limit_per_second: 10_000,
        poll_interval: Duration::from_millis(10),
        confirmation_timeout: Duration::from_secs(10),
    }
}

pub struct TestEnv {
    pub orchestrator: Orchestrator,
    pub config: Config,
    pub ledger: Ledger,
    pub storage: ArtifactStore,
    pub crypto: EncryptionLayer,
    /// Handles on the simulated chains behind each adapter
    pub chains: BTreeMap<Network, SimulatedChain>,
    pub dir: TempDir,
}

impl TestEnv {
    pub async fn start() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = Config::default();
        config.ledger.url = format!("sqlite://{}", dir.path().join("ledger.db").display());
        config.storage.local_dir = dir.path().join("objects");
        // Small enough that test uploads spill to disk
        config.pipeline.memory_threshold_bytes = 64;
        config.pipeline.auto_retry_cooldown_secs = 0;
        config.cors.allowed_origins = vec!["*".to_string()];
        config.cors.allow_credentials = false;
        configure(&mut config);

        let ledger = Ledger::connect(&config.ledger).await.expect("ledger");
        let storage = ArtifactStore::from_config(&config.storage)
            .await
            .expect("storage");
        let crypto = EncryptionLayer::new(Arc::new(MemoryKeyStore::new()));
        let chains: BTreeMap<_, _> = Network::ALL
            .iter()
            .map(|&network| (network, SimulatedChain::new()))
            .collect();

        let orchestrator = build_orchestrator(&config, &ledger, &storage, &crypto, &chains);
        Self {
            orchestrator,
            config,
            ledger,
            storage,
            crypto,
            chains,
            dir,
        }
    }

    /// Stop the current orchestrator and start a fresh one on the same
    /// ledger, storage, keys and chains, without recovering yet
    pub async fn restart(&mut self) {
        assert!(
            self.orchestrator.shutdown(Duration::from_secs(5)).await,
            "pipeline tasks did not stop"
        );
        self.orchestrator = build_orchestrator(
            &self.config,
            &self.ledger,
            &self.storage,
            &self.crypto,
            &self.chains,
        );
    }

    pub fn chain(&self, network: Network) -> &SimulatedChain {
        &self.chains[&network]
    }

    pub fn app(&self) -> Router {
        api::router(self.orchestrator.clone(), &self.config)
    }

    pub async fn submit_csv(&self, file_name: &str, data: &[u8]) -> Job {
        self.orchestrator
            .submit(csv_upload(file_name, data))
            .await
            .expect("submit")
    }

    /// Poll the ledger until the job reaches `want`; panics if it settles
    /// elsewhere or takes too long
    pub async fn wait_for_state(&self, job_id: Uuid, want: JobState) -> Job {
        wait_for_state(&self.ledger, job_id, want).await
    }

    /// Poll until `predicate` holds for the job's chain record on `network`
    pub async fn wait_for_record<F>(&self, job_id: Uuid, network: Network, predicate: F)
    where
        F: Fn(&chainvault_server::models::ChainRecord) -> bool,
    {
        tokio::time::timeout(WAIT_TIMEOUT, async {
            loop {
                if let Some(record) = self.ledger.chain_record(job_id, network).await.unwrap() {
                    if predicate(&record) {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("chain record of {job_id} on {network} never matched"));
    }
}

fn build_orchestrator(
    config: &Config,
    ledger: &Ledger,
    storage: &ArtifactStore,
    crypto: &EncryptionLayer,
    chains: &BTreeMap<Network, SimulatedChain>,
) -> Orchestrator {
    let mut registry = ChainRegistry::new();
    for (&network, chain) in chains {
        registry.insert(ChainAdapter::new(
            network,
            ChainBackend::Simulated(chain.clone()),
            fast_settings(),
        ));
    }
    Orchestrator::new(
        ledger.clone(),
        storage.clone(),
        crypto.clone(),
        registry,
        config.pipeline.clone(),
    )
}

pub async fn wait_for_state(ledger: &Ledger, job_id: Uuid, want: JobState) -> Job {
    let outcome = tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            let job = ledger.get_job(job_id).await.expect("job exists");
            if job.state == want {
                return job;
            }
            if job.state.is_terminal() {
                panic!(
                    "job {} settled in {} instead of {} ({:?})",
                    job_id, job.state, want, job.error
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    outcome.unwrap_or_else(|_| panic!("job {job_id} did not reach {want} in time"))
}

pub fn csv_upload(file_name: &str, data: &[u8]) -> Upload {
    upload(file_name, SourceFormat::Csv, data)
}

pub fn upload(file_name: &str, format: SourceFormat, data: &[u8]) -> Upload {
    Upload {
        file_name: file_name.to_string(),
        format,
        network: Network::Ethereum,
        tier: EncryptionTier::High,
        infer_types: false,
        data: Spool::from_bytes(data.to_vec()),
        checksum: sha256_hex(data),
    }
}

// ============================================================================
// HTTP helpers
// ============================================================================

pub const BOUNDARY: &str = "chainvault-test-boundary";

/// Encode a multipart/form-data body with text `fields` and an optional file part
pub fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.expect("router is infallible")
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        panic!("body is not JSON ({e}): {}", String::from_utf8_lossy(&bytes))
    })
}

pub async fn get(app: &Router, uri: &str) -> Response {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

pub async fn post_multipart(app: &Router, uri: &str, body: Vec<u8>) -> Response {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap(),
    )
    .await
}

pub async fn delete(app: &Router, uri: &str) -> Response {
    send(
        app,
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}
