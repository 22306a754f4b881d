use agency_common::api::{RateLimitSummary, RateLimitsResponse};
use agency_common::PolicyName;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::error::{Result, ServerError};
use crate::middleware::AdminUser;
use crate::router::AppState;

pub async fn list_rate_limits(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Json<RateLimitsResponse> {
    let limits = state
        .limiters
        .iter()
        .map(|limiter| {
            let policy = limiter.policy();
            RateLimitSummary {
                policy: limiter.name(),
                max_requests: policy.max_requests,
                window_ms: policy.window_ms,
                tracked_identifiers: limiter.tracked(),
            }
        })
        .collect();

    Json(RateLimitsResponse { limits })
}

/// Clear one client's counter so it can make requests again immediately.
pub async fn reset_rate_limit(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path((policy, identifier)): Path<(String, String)>,
) -> Result<StatusCode> {
    let name: PolicyName = policy
        .parse()
        .map_err(|e: agency_common::CommonError| ServerError::Validation(e.to_string()))?;

    let removed = state.limiters.get(name).reset(&identifier);
    tracing::info!(policy = %name, client = %identifier, removed, "rate limit reset by admin");

    Ok(StatusCode::NO_CONTENT)
}
