use agency_common::api::UploadResponse;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;

use crate::error::{Result, ServerError};
use crate::middleware::AdminUser;
use crate::router::AppState;
use crate::storage::ImageKind;

#[tracing::instrument(skip_all)]
pub async fn create(
    State(state): State<AppState>,
    _admin: AdminUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let kind = ImageKind::from_content_type(content_type)
        .ok_or_else(|| ServerError::UnsupportedMediaType(content_type.to_string()))?;

    let max = state.uploads.max_bytes();
    if body.len() > max {
        return Err(ServerError::PayloadTooLarge {
            size: body.len(),
            max,
        });
    }
    if body.is_empty() {
        return Err(ServerError::Validation("upload body is empty".to_string()));
    }
    if !kind.matches(&body) {
        return Err(ServerError::Validation(format!(
            "body is not a valid {} image",
            kind.extension()
        )));
    }

    let stored = state.uploads.save(kind, &body).await?;

    Ok(Json(UploadResponse {
        id: stored.id.to_string(),
        path: stored.file_name,
        bytes: stored.bytes,
    }))
}
