use agency_common::api::{LoginRequest, LoginResponse};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::SecondsFormat;

use crate::auth::verify_password;
use crate::error::{Result, ServerError};
use crate::middleware::AdminUser;
use crate::router::AppState;

#[tracing::instrument(skip_all, fields(username = %req.username))]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let Some(password_hash) = state.admin.password_hash.as_deref() else {
        tracing::warn!("login attempted but no admin password hash is configured");
        return Err(ServerError::InvalidCredentials);
    };

    let valid = verify_password(&req.password, password_hash)
        .map_err(|e| ServerError::Internal(format!("password verification failed: {e}")))?;

    // Verify the password even for an unknown username so both paths take
    // the same time.
    if !valid || req.username != state.admin.username {
        tracing::warn!("invalid admin credentials");
        return Err(ServerError::InvalidCredentials);
    }

    let (token, expires_at) = state
        .sessions
        .create(state.admin.session_ttl)
        .ok_or_else(|| ServerError::Internal("session expiry out of range".to_string()))?;
    tracing::info!("admin logged in");

    Ok(Json(LoginResponse {
        token,
        expires_at: expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}

pub async fn logout(State(state): State<AppState>, admin: AdminUser) -> StatusCode {
    state.sessions.revoke(&admin.token);
    StatusCode::NO_CONTENT
}
