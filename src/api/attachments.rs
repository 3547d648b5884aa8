use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::services::ServeFile;

use super::{ApiError, ApiResponse, AppState};
use crate::storage::StoredFile;

const TOO_LARGE: &str = "Attachment exceeds maximum allowed size";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub storage_key: String,
    pub file_name: String,
    pub size: u64,
    pub content_type: String,
}

impl From<StoredFile> for UploadResponse {
    fn from(file: StoredFile) -> Self {
        Self {
            url: file.url,
            storage_key: file.storage_key,
            file_name: file.file_name,
            size: file.size,
            content_type: file.content_type,
        }
    }
}

fn multipart_error(e: &MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(TOO_LARGE.to_string())
    } else {
        ApiError::validation(format!("Multipart error: {e}"))
    }
}

/// POST /attachments
/// Multipart upload of a single `file` field
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<UploadResponse>>), ApiError> {
    let max_size = state.config().read().await.attachments.max_size_bytes;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("file").to_string();
        let content_type = field.content_type().map_or_else(
            || {
                mime_guess::from_path(&file_name)
                    .first_or_octet_stream()
                    .to_string()
            },
            str::to_string,
        );

        let data = field.bytes().await.map_err(|e| multipart_error(&e))?;
        if data.is_empty() {
            return Err(ApiError::validation("No file provided"));
        }
        if data.len() as u64 > max_size {
            return Err(ApiError::PayloadTooLarge(TOO_LARGE.to_string()));
        }

        let stored = state
            .shared
            .storage
            .upload(&data, &file_name, &content_type)
            .await?;
        tracing::info!(key = %stored.storage_key, size = stored.size, "Attachment uploaded");

        return Ok((
            StatusCode::CREATED,
            Json(ApiResponse::success(stored.into())),
        ));
    }

    Err(ApiError::validation("No file provided"))
}

/// GET /files/{key}
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let path = state.shared.storage.path_for(&key).await?;

    let mut builder = axum::http::Request::builder();
    if let Some(range) = headers.get(header::RANGE) {
        builder = builder.header(header::RANGE, range.clone());
    }
    let req = builder
        .body(axum::body::Body::empty())
        .map_err(|e| ApiError::internal(format!("Failed to build request: {e}")))?;

    match ServeFile::new(path).try_call(req).await {
        Ok(res) => Ok(res.into_response()),
        Err(e) => Err(ApiError::internal(format!("Failed to read attachment: {e}"))),
    }
}
