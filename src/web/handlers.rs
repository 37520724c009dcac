use super::AppState;
use crate::error::TaggerError;
use crate::status::DownloadStatus;
use crate::tagging::TagResult;
use crate::tracing_config::spans;
use axum::{
    body::Bytes,
    extract::{
        multipart::{Multipart, MultipartRejection},
        rejection::QueryRejection,
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;

/// Query parameters of `POST /tag`
#[derive(Debug, Default, Deserialize)]
pub struct TagParams {
    pub threshold: Option<f32>,
}

/// Body of `POST /tag`
///
/// Pipeline failures are reported in-band with a 200 status.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TagResponse {
    Tags { tags: Vec<TagResult> },
    Error { error: String },
}

impl TagResponse {
    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// Failure to extract an upload from the request
#[derive(Debug)]
struct UploadError {
    status: StatusCode,
    message: String,
}

impl UploadError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

/// Read the first multipart field called `name`
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
    name: &str,
) -> Result<Bytes, UploadError> {
    let mut multipart = multipart.map_err(|e| UploadError {
        status: e.status(),
        message: e.body_text(),
    })?;

    loop {
        let field = multipart.next_field().await.map_err(|e| UploadError {
            status: e.status(),
            message: format!("Failed to read multipart field: {e}"),
        })?;

        let Some(field) = field else {
            return Err(UploadError::bad_request(format!(
                "Missing multipart field '{name}'"
            )));
        };

        if field.name() == Some(name) {
            return field.bytes().await.map_err(|e| UploadError {
                status: e.status(),
                message: format!("Failed to read field '{name}': {e}"),
            });
        }
    }
}

/// `POST /tag`: classify an uploaded image
pub async fn tag_handler(
    State(state): State<AppState>,
    params: Result<Query<TagParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    if !state.tagger_loaded() {
        return Json(TagResponse::error(TaggerError::NotLoaded.to_string())).into_response();
    }

    let threshold = match params {
        Ok(Query(params)) => params.threshold.unwrap_or(state.default_threshold),
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(TagResponse::error(e.body_text())),
            )
                .into_response()
        },
    };

    let upload = match read_upload(multipart, "file").await {
        Ok(bytes) => bytes,
        Err(e) => return (e.status, Json(TagResponse::error(e.message))).into_response(),
    };

    let request_id = uuid::Uuid::new_v4();
    let start = Instant::now();
    tracing::info!(
        "Tag request {}: {} bytes, threshold={}",
        request_id,
        upload.len(),
        threshold
    );

    let tagger = state.tagger.clone();
    let span = spans::request("tag", &request_id);
    let result = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        match tagger.get() {
            Some(tagger) => tagger.tag_bytes(&upload, Some(threshold)),
            None => Err(TaggerError::NotLoaded),
        }
    })
    .await
    .unwrap_or_else(|e| Err(TaggerError::internal(format!("Tagging task failed: {e}"))));

    let response = match result {
        Ok(tags) => {
            tracing::info!(
                "Tag request {} completed: {} tags in {:.3}s",
                request_id,
                tags.len(),
                start.elapsed().as_secs_f32()
            );
            TagResponse::Tags { tags }
        },
        Err(e) => {
            tracing::warn!("Tag request {} failed: {}", request_id, e);
            TagResponse::error(e.to_string())
        },
    };

    Json(response).into_response()
}

/// `POST /rmbg`: strip the background of an uploaded image
pub async fn rmbg_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    if state.remover.get().is_none() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            TaggerError::NotLoaded.to_string(),
        )
            .into_response();
    }

    let upload = match read_upload(multipart, "image").await {
        Ok(bytes) => bytes,
        Err(e) => return (e.status, e.message).into_response(),
    };

    let request_id = uuid::Uuid::new_v4();
    let start = Instant::now();
    tracing::info!("Rmbg request {}: {} bytes", request_id, upload.len());

    let remover = state.remover.clone();
    let span = spans::request("rmbg", &request_id);
    let result = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        match remover.get() {
            Some(remover) => remover.remove_background(&upload),
            None => Err(TaggerError::NotLoaded),
        }
    })
    .await
    .unwrap_or_else(|e| Err(TaggerError::internal(format!("Segmentation task failed: {e}"))));

    match result {
        Ok(png) => {
            tracing::info!(
                "Rmbg request {} completed: {} bytes in {:.3}s",
                request_id,
                png.len(),
                start.elapsed().as_secs_f32()
            );
            ([(header::CONTENT_TYPE, "image/png")], png).into_response()
        },
        Err(e) => {
            tracing::error!("Rmbg request {} failed: {}", request_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        },
    }
}

/// `GET /download-status`
pub async fn download_status_handler(State(state): State<AppState>) -> Json<DownloadStatus> {
    Json(state.status.snapshot())
}

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "model_loaded": state.tagger_loaded(),
    }))
}
