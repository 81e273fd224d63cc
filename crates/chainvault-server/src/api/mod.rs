pub mod response;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::compression::CompressionLayer;

use crate::config::Config;
use crate::features::{self, FeatureState};
use crate::middleware;
use crate::pipeline::Orchestrator;
use response::ErrorResponse;

/// State of the top-level (non-feature) routes
#[derive(Clone, Debug)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

/// Build the full application: `/`, `/health` and the features under `/api/v1`
pub fn router(orchestrator: Orchestrator, config: &Config) -> Router {
    let feature_state = FeatureState {
        orchestrator: orchestrator.clone(),
        max_upload_bytes: config.server.max_upload_bytes,
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .with_state(AppState { orchestrator })
        .nest("/api/v1", features::router(feature_state))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "ChainVault",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Liveness with a ledger round trip
async fn health_check(State(state): State<AppState>) -> Response {
    match state.orchestrator.ledger().health_check().await {
        Ok(()) => {
            let networks: Vec<_> = state.orchestrator.chains().networks().collect();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "healthy",
                    "ledger": "connected",
                    "storage": state.orchestrator.storage().kind(),
                    "networks": networks,
                })),
            )
                .into_response()
        },
        Err(e) => {
            tracing::error!(error = %e, "Ledger health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new("SERVICE_UNAVAILABLE", "Ledger is unreachable")),
            )
                .into_response()
        },
    }
}
