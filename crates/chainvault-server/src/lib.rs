//! ChainVault server library
//!
//! Accepts SQL dumps and CSV files, converts them to JSON, encrypts the
//! result and anchors a reference to it on an EVM network.
//!
//! # Architecture
//!
//! - [`pipeline`]: the job orchestrator. Each upload becomes a job that moves
//!   `Queued → Parsing → Converting → Encrypting → Anchoring → Confirmed`,
//!   or ends `Failed`/`Cancelled`. Every move is committed to the [`ledger`]
//!   before the next stage starts and is broadcast as a progress event.
//! - [`chain`]: one adapter per network (Ethereum, Polygon, BSC, Avalanche)
//!   with retries, rate limiting and confirmation tracking.
//! - [`crypto`]: per-job AES-GCM data keys kept in a key store.
//! - [`storage`]: uploads, converted JSON and ciphertext on disk or S3.
//! - [`features`]: the HTTP API under `/api/v1`, one vertical slice per
//!   area with its own commands, queries and routes.
//!
//! # Example
//!
//! ```no_run
//! use chainvault_server::{api, config::Config, ledger::Ledger, pipeline::Orchestrator};
//! use chainvault_server::{chain::ChainRegistry, crypto::EncryptionLayer, storage::ArtifactStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let orchestrator = Orchestrator::new(
//!         Ledger::connect(&config.ledger).await?,
//!         ArtifactStore::from_config(&config.storage).await?,
//!         EncryptionLayer::from_config(&config.crypto).await?,
//!         ChainRegistry::from_config(&config.chain)?,
//!         config.pipeline.clone(),
//!     );
//!     orchestrator.recover().await?;
//!
//!     let app = api::router(orchestrator, &config);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod api;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod features;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod storage;

pub use error::AppError;
