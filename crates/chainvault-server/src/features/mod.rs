//! Feature slices of the ChainVault API
//!
//! Each slice owns its `commands/` (writes), `queries/` (reads) and a
//! `routes.rs` that turns HTTP requests into those and back:
//!
//! - **files**: upload, conversion status, download, listing and deletion
//! - **blockchain**: anchoring payloads, retrieving them, transaction and
//!   network views
//! - **jobs**: job detail with transition history, cancellation and the
//!   server-sent progress stream

pub mod blockchain;
pub mod files;
pub mod jobs;

use axum::Router;

use crate::pipeline::Orchestrator;

/// Shared state for all feature routes
#[derive(Clone, Debug)]
pub struct FeatureState {
    pub orchestrator: Orchestrator,
    /// Largest accepted upload, in bytes
    pub max_upload_bytes: u64,
}

/// Mounts every feature under its own prefix:
/// - `/files`
/// - `/blockchain`
/// - `/jobs`
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .nest("/files", files::files_routes(state.max_upload_bytes))
        .nest("/blockchain", blockchain::blockchain_routes())
        .nest("/jobs", jobs::jobs_routes())
        .with_state(state)
}
