use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{from_fn_with_state, map_response_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::SessionStore;
use crate::error::ServerError;
use crate::handlers::{admin, auth, contact, health, upload};
use crate::metrics_middleware::HttpMetricsLayer;
use crate::middleware::{enforce, RateLimitGuard};
use crate::rate_limit::RateLimiters;
use crate::relay::ContactRelay;
use crate::storage::UploadStore;

/// Slack on top of the upload limit for everything that is not the image.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Admin login settings.
pub struct AdminCredentials {
    pub username: String,
    pub password_hash: Option<String>,
    pub session_ttl: chrono::Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub limiters: RateLimiters,
    pub sessions: SessionStore,
    pub admin: Arc<AdminCredentials>,
    pub uploads: UploadStore,
    pub relay: ContactRelay,
}

pub fn build(state: AppState, cors_origins: &[String]) -> Router {
    let body_limit = state.uploads.max_bytes().saturating_add(BODY_LIMIT_SLACK);
    let cors = build_cors_layer(cors_origins);

    let contact_routes = Router::new()
        .route("/api/v1/contact", post(contact::submit))
        .route_layer(from_fn_with_state(
            RateLimitGuard::new(state.limiters.contact.clone()),
            enforce,
        ));

    // Size is checked by the handler so oversized images get a JSON error.
    let upload_routes = Router::new()
        .route("/api/v1/uploads", post(upload::create))
        .layer(DefaultBodyLimit::disable())
        .route_layer(from_fn_with_state(
            RateLimitGuard::new(state.limiters.upload.clone()),
            enforce,
        ));

    let auth_routes = Router::new()
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route_layer(from_fn_with_state(
            RateLimitGuard::new(state.limiters.auth.clone()),
            enforce,
        ));

    let api_routes = Router::new()
        .route("/api/v1/admin/rate-limits", get(admin::list_rate_limits))
        .route(
            "/api/v1/admin/rate-limits/:policy/:identifier",
            delete(admin::reset_rate_limit),
        )
        .route_layer(from_fn_with_state(
            RateLimitGuard::new(state.limiters.api.clone()),
            enforce,
        ));

    Router::new()
        .route("/api/v1/health", get(health::health))
        .merge(contact_routes)
        .merge(upload_routes)
        .merge(auth_routes)
        .merge(api_routes)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(map_response_with_state(
            state.uploads.max_bytes(),
            payload_too_large_as_json,
        ))
        .layer(cors)
        .layer(HttpMetricsLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Replace the plain-text 413 produced by the outer body limit with the same
/// JSON error the upload handler returns.
async fn payload_too_large_as_json(
    State(max): State<usize>,
    headers: HeaderMap,
    response: Response,
) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if response.status() != StatusCode::PAYLOAD_TOO_LARGE || is_json {
        return response;
    }

    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    ServerError::PayloadTooLarge { size, max }.into_response()
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .expose_headers([
            axum::http::header::RETRY_AFTER,
            crate::middleware::X_RATELIMIT_LIMIT,
            crate::middleware::X_RATELIMIT_REMAINING,
            crate::middleware::X_RATELIMIT_RESET,
        ]);

    if origins.is_empty() {
        // No AGENCY_CORS_ORIGINS configured: allow http://localhost only, so
        // local development of the site works out of the box.
        cors.allow_origin(AllowOrigin::exact(HeaderValue::from_static(
            "http://localhost",
        )))
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(AllowOrigin::list(parsed))
    }
}
