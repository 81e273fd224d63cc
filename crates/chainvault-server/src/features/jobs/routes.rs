use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use futures::Stream;
use serde::Deserialize;
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use uuid::Uuid;

use super::{commands::CancelJobCommand, queries::GetJobQuery};
use crate::api::response::{ApiResponse, ApiResult};
use crate::error::AppError;
use crate::features::FeatureState;

pub fn jobs_routes() -> Router<FeatureState> {
    Router::new()
        .route("/events", get(job_events))
        .route("/:job_id", get(get_job))
        .route("/:job_id/cancel", post(cancel_job))
}

/// Optional filter of the event stream
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub job_id: Option<Uuid>,
}

/// GET /jobs/events[?jobId=]
///
/// Server-sent events, one per committed transition or confirmation poll.
/// The event name is `transition` or `confirmation`, the data the JSON event.
async fn job_events(
    State(state): State<FeatureState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let job_filter = query.job_id;
    let shutdown = state.orchestrator.shutdown_token();

    let stream = BroadcastStream::new(state.orchestrator.subscribe())
        .filter_map(move |item| {
            let event = match item {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress subscriber lagging, events dropped");
                    return None;
                },
            };
            if job_filter.is_some_and(|id| id != event.job_id) {
                return None;
            }
            match Event::default().event(event.event_name()).json_data(&event) {
                Ok(sse) => Some(Ok::<_, Infallible>(sse)),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode progress event");
                    None
                },
            }
        });
    let stream = futures::StreamExt::take_until(stream, shutdown.cancelled_owned());

    tracing::debug!(job_id = ?job_filter, "Progress subscriber connected");
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /jobs/:job_id
#[tracing::instrument(skip(state))]
async fn get_job(
    State(state): State<FeatureState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    let response = super::queries::get_job::handle(&state.orchestrator, GetJobQuery { job_id })
        .await
        .map_err(AppError::from)?;
    Ok(ApiResponse::success(response).into_response())
}

/// POST /jobs/:job_id/cancel
#[tracing::instrument(skip(state))]
async fn cancel_job(
    State(state): State<FeatureState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    let response =
        super::commands::cancel::handle(&state.orchestrator, CancelJobCommand { job_id })
            .await
            .map_err(AppError::from)?;
    tracing::info!(job_id = %job_id, state = %response.state, changed = response.changed, "Cancel handled");
    Ok(ApiResponse::success(response).into_response())
}
