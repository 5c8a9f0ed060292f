//! Upload and media status handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use mediaflow_models::{original_key, Media, MediaId, MediaStatus};
use mediaflow_queue::DispatchOutcome;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Upload intent request.
#[derive(Debug, Default, Deserialize)]
pub struct UploadUrlRequest {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadUrlResponse {
    pub media_id: String,
    pub upload_url: String,
    pub original_key: String,
    pub expires_in: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteUploadRequest {
    #[serde(default)]
    pub media_id: String,
    #[serde(default)]
    pub original_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    pub status: MediaStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MediaResponse {
    pub media_id: String,
    pub status: MediaStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
}

fn validate_content_type(content_type: Option<&str>) -> ApiResult<()> {
    match content_type {
        Some(ct) if !ct.is_empty() && !ct.starts_with("image/") => {
            Err(ApiError::bad_request("content_type must be image/*"))
        }
        _ => Ok(()),
    }
}

/// Create a media item and a presigned URL to upload its original.
pub async fn create_upload_url(
    State(state): State<AppState>,
    Json(request): Json<UploadUrlRequest>,
) -> ApiResult<Json<UploadUrlResponse>> {
    validate_content_type(request.content_type.as_deref())?;

    let media_id = MediaId::new();
    let key = original_key(&media_id, request.file_name.as_deref());
    let ttl = state.config.upload_url_ttl;

    let upload_url = state.objects.presign_put(&key, ttl).await?;
    state.media.insert_media(&Media::new(media_id.clone(), &key)).await?;

    info!(media_id = %media_id, original_key = %key, "Created upload intent");

    Ok(Json(UploadUrlResponse {
        media_id: media_id.to_string(),
        upload_url,
        original_key: key,
        expires_in: ttl.as_secs(),
    }))
}

/// Mark the upload done and dispatch the first pipeline step.
pub async fn complete_upload(
    State(state): State<AppState>,
    Json(request): Json<CompleteUploadRequest>,
) -> ApiResult<Json<CompleteUploadResponse>> {
    let media_id = request.media_id.trim();
    let original_key = request.original_key.trim();
    if media_id.is_empty() || original_key.is_empty() {
        return Err(ApiError::bad_request("media_id and original_key required"));
    }
    let media_id = MediaId::from(media_id);

    let media = state
        .media
        .get_media(&media_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("media {}", media_id)))?;

    // Repeated completion must not pull a finished item back to PROCESSING.
    let status = match media.status {
        MediaStatus::Init => {
            state
                .media
                .update_media_status(&media_id, MediaStatus::Processing)
                .await?;
            MediaStatus::Processing
        }
        other => other,
    };

    let outcome = state
        .dispatcher
        .dispatch(&media_id, &state.config.first_step, original_key)
        .await?;
    if let DispatchOutcome::Created(task_id) = outcome {
        info!(media_id = %media_id, task_id = %task_id, "Upload complete, pipeline started");
    }

    Ok(Json(CompleteUploadResponse { status }))
}

/// Media status, with a presigned URL for the final artifact once done.
pub async fn get_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MediaResponse>> {
    let media_id = MediaId::from(id);
    let media = state
        .media
        .get_media(&media_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("media {}", media_id)))?;

    let final_url = match &media.final_key {
        Some(key) => Some(
            state
                .objects
                .presign_get(key, state.config.upload_url_ttl)
                .await?,
        ),
        None => None,
    };

    Ok(Json(MediaResponse {
        media_id: media.id.to_string(),
        status: media.status,
        final_url,
    }))
}
