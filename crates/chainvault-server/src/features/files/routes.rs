use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Router,
};
use chainvault_common::checksum::HashingWriter;
use chainvault_convert::Spool;
use futures::{Stream, StreamExt, TryStreamExt};
use std::io::Write;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::{
    commands::{DeleteFileCommand, UploadFileCommand, UploadFileError},
    queries::{ConvertStatusQuery, DownloadFileQuery, DownloadFileResponse, ListFilesQuery},
};
use crate::api::response::{ApiResponse, ApiResult};
use crate::error::AppError;
use crate::features::FeatureState;

/// Room for the non-file multipart fields on top of the file size limit
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Chunks queued between the request body and the spool writer
const SPOOL_QUEUE_CHUNKS: usize = 8;

pub fn files_routes(max_upload_bytes: u64) -> Router<FeatureState> {
    let body_limit = usize::try_from(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES))
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/", get(list_files))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/convert/:job_id", get(convert_status))
        .route("/:file_id/download", get(download_file))
        .route("/:file_id", delete(delete_file))
}

/// POST /files/upload
///
/// Multipart fields: `file`, `conversionType`, `blockchainNetwork`,
/// `encryptionLevel`, `inferTypes`, `fileName` (when the file part has none).
#[tracing::instrument(skip(state, multipart))]
async fn upload_file(
    State(state): State<FeatureState>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let limit = state.max_upload_bytes;
    let threshold = state.orchestrator.config().memory_threshold_bytes;
    let to_app_error = |e: MultipartError| multipart_error(e, limit);

    let mut file: Option<(Option<String>, Spool, String)> = None;
    let mut file_name_field = None;
    let mut conversion_type = None;
    let mut blockchain_network = None;
    let mut encryption_level = None;
    let mut infer_types = None;

    while let Some(field) = multipart.next_field().await.map_err(to_app_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let part_name = field.file_name().map(str::to_string);
                let (spool, checksum, size) =
                    spool_upload(field.map_err(to_app_error), threshold, limit).await?;
                tracing::debug!(size, spilled = spool.is_spilled(), "Upload received");
                file = Some((part_name, spool, checksum));
            },
            "fileName" => file_name_field = Some(field.text().await.map_err(to_app_error)?),
            "conversionType" => conversion_type = Some(field.text().await.map_err(to_app_error)?),
            "blockchainNetwork" => {
                blockchain_network = Some(field.text().await.map_err(to_app_error)?)
            },
            "encryptionLevel" => encryption_level = Some(field.text().await.map_err(to_app_error)?),
            "inferTypes" => infer_types = Some(field.text().await.map_err(to_app_error)?),
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let (part_name, data, checksum) =
        file.ok_or_else(|| AppError::from(UploadFileError::FileRequired))?;

    let command = UploadFileCommand {
        file_name: part_name.or(file_name_field),
        conversion_type,
        blockchain_network,
        encryption_level,
        infer_types,
        data,
        checksum,
    };

    let response = super::commands::upload::handle(&state.orchestrator, command).await?;

    tracing::info!(
        job_id = %response.job_id,
        size = response.size,
        network = %response.network,
        "File accepted for conversion"
    );

    Ok(ApiResponse::success(response).with_status(StatusCode::ACCEPTED))
}

/// Write an upload body into a [`Spool`] on the blocking pool, hashing it on
/// the way. Returns the spool, its SHA-256 and its size.
async fn spool_upload<S>(chunks: S, threshold: usize, limit: u64) -> ApiResult<(Spool, String, u64)>
where
    S: Stream<Item = Result<Bytes, AppError>>,
{
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Bytes>(SPOOL_QUEUE_CHUNKS);
    let writer = tokio::task::spawn_blocking(move || {
        let mut writer = HashingWriter::new(Spool::new(threshold));
        while let Some(chunk) = rx.blocking_recv() {
            writer.write_all(&chunk)?;
        }
        writer.finish()
    });

    let mut chunks = std::pin::pin!(chunks);
    let mut received = 0u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        received += chunk.len() as u64;
        if received > limit {
            return Err(AppError::PayloadTooLarge { limit });
        }
        if tx.send(chunk).await.is_err() {
            // The writer failed; its error is returned below
            break;
        }
    }
    drop(tx);

    writer
        .await
        .map_err(|e| AppError::Internal(format!("spool task failed: {}", e)))?
        .map_err(|e| AppError::Internal(format!("failed to spool upload: {}", e)))
}

fn multipart_error(err: MultipartError, limit: u64) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit }
    } else {
        AppError::Validation(format!("Invalid multipart body: {}", err.body_text()))
    }
}

/// GET /files?state=&page=&per_page=
#[tracing::instrument(skip(state))]
async fn list_files(
    State(state): State<FeatureState>,
    Query(query): Query<ListFilesQuery>,
) -> ApiResult<Response> {
    let response = super::queries::list::handle(&state.orchestrator, query).await?;
    let meta = serde_json::to_value(&response.pagination)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(ApiResponse::success_with_meta(response.jobs, meta).into_response())
}

/// GET /files/convert/:job_id
#[tracing::instrument(skip(state))]
async fn convert_status(
    State(state): State<FeatureState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    let response =
        super::queries::convert_status::handle(&state.orchestrator, ConvertStatusQuery { job_id })
            .await?;
    Ok(ApiResponse::success(response).into_response())
}

/// GET /files/:file_id/download
#[tracing::instrument(skip(state))]
async fn download_file(
    State(state): State<FeatureState>,
    Path(file_id): Path<Uuid>,
) -> ApiResult<Response> {
    let response =
        super::queries::download::handle(&state.orchestrator, DownloadFileQuery { job_id: file_id })
            .await?;

    match response {
        DownloadFileResponse::Local {
            path,
            file_name,
            size,
        } => {
            let file = tokio::fs::File::open(&path).await.map_err(|e| {
                AppError::Internal(format!("failed to open {}: {}", path.display(), e))
            })?;
            let body = Body::from_stream(ReaderStream::new(file));
            Ok((
                [
                    (header::CONTENT_TYPE, "application/json".to_string()),
                    (header::CONTENT_LENGTH, size.to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", file_name.replace('"', "")),
                    ),
                ],
                body,
            )
                .into_response())
        },
        DownloadFileResponse::Presigned { url } => Ok(Redirect::temporary(&url).into_response()),
    }
}

/// DELETE /files/:file_id[?permanent=true]
#[tracing::instrument(skip(state))]
async fn delete_file(
    State(state): State<FeatureState>,
    Path(file_id): Path<Uuid>,
    Query(mut command): Query<DeleteFileCommand>,
) -> ApiResult<Response> {
    command.job_id = file_id;
    let response = super::commands::delete::handle(&state.orchestrator, command).await?;
    tracing::info!(job_id = %file_id, outcome = response.outcome, "File delete handled");
    Ok(ApiResponse::success(response).into_response())
}
