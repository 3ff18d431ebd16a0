use crate::api::error::{ApiError, ApiResult};
use crate::api::types::*;
use crate::session::{SessionError, UploadManager};
use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartError,
        rejection::{BytesRejection, JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;

pub struct RestApi {
    manager: Arc<UploadManager>,
}

impl RestApi {
    pub fn new(manager: Arc<UploadManager>) -> Self {
        Self { manager }
    }

    pub fn router(&self) -> Router {
        let body_limit = self.manager.config().max_request_bytes();

        Router::new()
            .route("/health", get(health_check))
            .route("/files/upload", post(upload_file))
            .route("/files/chunk/init", post(init_upload))
            .route("/files/chunk/upload/:id", post(upload_chunk))
            .route("/files/chunk/status/:id", get(upload_status))
            .route("/files/chunk/complete/:id", post(complete_upload))
            .route("/files/chunk/cancel/:id", delete(cancel_upload))
            .layer(DefaultBodyLimit::max(body_limit))
            .with_state(self.manager.clone())
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn upload_file(
    State(manager): State<Arc<UploadManager>>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let mut file: Option<(String, Bytes)> = None;
    let mut directory = String::new();

    // The directory field may follow the file field, so the file is buffered.
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name().unwrap_or("") {
            "file" => {
                let filename = field
                    .file_name()
                    .ok_or_else(|| ApiError::InvalidRequest("No filename provided".to_string()))?
                    .to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                file = Some((filename, data));
            }
            "directory" => {
                directory = field.text().await.map_err(multipart_error)?;
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let (filename, data) =
        file.ok_or_else(|| ApiError::InvalidRequest("Missing file field".to_string()))?;

    let saved = manager.save_whole(&filename, &directory, &data).await?;

    Ok(Json(UploadResponse {
        success: true,
        filename: saved.filename,
        size: saved.size,
        path: saved.path,
        checksum: saved.checksum,
    }))
}

async fn init_upload(
    State(manager): State<Arc<UploadManager>>,
    payload: Result<Json<InitUploadRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<InitUploadResponse>)> {
    let Json(req) = payload.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    let file_size = positive(req.file_size, "file_size")?;
    let chunk_size = positive(req.chunk_size, "chunk_size")?;

    let outcome = manager
        .init(&req.filename, &req.directory, file_size, chunk_size)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitUploadResponse {
            success: true,
            upload_id: outcome.upload_id,
            total_chunks: outcome.total_chunks,
            chunk_size: outcome.chunk_size,
        }),
    ))
}

async fn upload_chunk(
    State(manager): State<Arc<UploadManager>>,
    Path(id): Path<String>,
    query: Result<Query<ChunkQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<ChunkUploadResponse>> {
    let Query(query) = query.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let raw_index = query
        .chunk_index
        .ok_or_else(|| ApiError::InvalidRequest("Missing chunk_index".to_string()))?;

    let body = body.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(e.body_text())
        } else {
            ApiError::InvalidRequest(e.body_text())
        }
    })?;

    let index = u32::try_from(raw_index)
        .map_err(|_| ApiError::InvalidChunkIndex(format!("chunk_index out of range: {raw_index}")))?;

    manager.put_chunk(&id, index, &body).await?;

    Ok(Json(ChunkUploadResponse {
        success: true,
        chunk_index: index,
    }))
}

async fn upload_status(
    State(manager): State<Arc<UploadManager>>,
    Path(id): Path<String>,
) -> ApiResult<Json<UploadStatusResponse>> {
    let status = manager.status(&id).await?;

    Ok(Json(UploadStatusResponse {
        success: true,
        upload_id: status.upload_id,
        filename: status.filename,
        directory: status.directory,
        total_chunks: status.total_chunks,
        uploaded_chunks: status.uploaded_chunks,
        file_size: status.total_size,
        chunk_size: status.chunk_size,
        uploaded_size: status.uploaded_size,
        created_at: status.created_at,
        updated_at: status.updated_at,
    }))
}

async fn complete_upload(
    State(manager): State<Arc<UploadManager>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CompleteUploadResponse>> {
    let saved = manager.complete(&id).await?;

    Ok(Json(CompleteUploadResponse {
        success: true,
        message: "Upload completed".to_string(),
        path: saved.path,
        filename: saved.filename,
        size: saved.size,
        checksum: saved.checksum,
    }))
}

async fn cancel_upload(
    State(manager): State<Arc<UploadManager>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    manager.cancel(&id).await?;

    Ok(Json(SuccessResponse {
        success: true,
        message: "Upload cancelled".to_string(),
    }))
}

fn positive(value: i64, field: &str) -> ApiResult<u64> {
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| SessionError::InvalidSize(format!("{field} must be > 0, got {value}")).into())
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::InvalidRequest(format!("Failed to read multipart field: {}", err.body_text()))
    }
}
