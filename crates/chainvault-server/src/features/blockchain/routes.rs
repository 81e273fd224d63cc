use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use super::{
    commands::StoreOnChainCommand,
    queries::{NetworksQuery, RetrieveQuery, TransactionsQuery},
};
use crate::api::response::{ApiResponse, ApiResult};
use crate::error::AppError;
use crate::features::FeatureState;

const JOB_ID_HEADER: HeaderName = HeaderName::from_static("x-chainvault-job-id");
const NETWORK_HEADER: HeaderName = HeaderName::from_static("x-chainvault-network");

pub fn blockchain_routes() -> Router<FeatureState> {
    Router::new()
        .route("/store", post(store_on_chain))
        .route("/retrieve/:hash", get(retrieve))
        .route("/transactions", get(list_transactions))
        .route("/networks", get(list_networks))
}

/// POST /blockchain/store
#[tracing::instrument(skip(state, command))]
async fn store_on_chain(
    State(state): State<FeatureState>,
    Json(command): Json<StoreOnChainCommand>,
) -> ApiResult<Response> {
    let response = super::commands::store::handle(&state.orchestrator, command).await?;
    tracing::info!(
        job_id = %response.job_id,
        network = %response.network,
        tx_hash = %response.tx_hash,
        "Anchor submitted"
    );
    Ok(ApiResponse::success(response).into_response())
}

/// GET /blockchain/retrieve/:hash[?network=]
///
/// Answers with the decrypted JSON document itself, not an envelope.
#[tracing::instrument(skip(state))]
async fn retrieve(
    State(state): State<FeatureState>,
    Path(hash): Path<String>,
    Query(mut query): Query<RetrieveQuery>,
) -> ApiResult<Response> {
    query.tx_hash = hash;
    let response = super::queries::retrieve::handle(&state.orchestrator, query).await?;

    let job_id = HeaderValue::from_str(&response.job_id.to_string())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (JOB_ID_HEADER, job_id),
            (NETWORK_HEADER, HeaderValue::from_static(response.network.as_str())),
        ],
        response.json,
    )
        .into_response())
}

/// GET /blockchain/transactions?network=&limit=
#[tracing::instrument(skip(state))]
async fn list_transactions(
    State(state): State<FeatureState>,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Response> {
    let response = super::queries::transactions::handle(&state.orchestrator, query).await?;
    Ok(ApiResponse::success(response).into_response())
}

/// GET /blockchain/networks
#[tracing::instrument(skip(state))]
async fn list_networks(State(state): State<FeatureState>) -> ApiResult<Response> {
    let networks = super::queries::networks::handle(&state.orchestrator, NetworksQuery)
        .await
        .map_err(AppError::from)?;
    Ok(ApiResponse::success(networks).into_response())
}
