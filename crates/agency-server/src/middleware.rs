use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use opentelemetry::metrics::Counter;
use opentelemetry::{global, KeyValue};

use crate::error::ServerError;
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::router::AppState;

/// Identifier used when a request carries no client address header.
pub const UNKNOWN_CLIENT: &str = "unknown";

const CLIENT_ADDRESS_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// An admin whose bearer token matched a live session.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub token: String,
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ServerError;

    fn from_request_parts<'a, 'b, 'c>(
        parts: &'a mut Parts,
        state: &'b AppState,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'c>,
    >
    where
        'a: 'c,
        'b: 'c,
        Self: 'c,
    {
        Box::pin(async move {
            let token = extract_bearer_token(&parts.headers).ok_or(ServerError::Unauthorized)?;

            if !state.sessions.is_valid(&token) {
                return Err(ServerError::Unauthorized);
            }

            Ok(AdminUser { token })
        })
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(|token| token.to_string())
}

/// Derive the rate-limit key for a request from its client address headers.
///
/// Checks the proxy chain (`X-Forwarded-For`, first hop), then `X-Real-IP`,
/// then Cloudflare's `CF-Connecting-IP`, falling back to [`UNKNOWN_CLIENT`].
pub fn client_identifier(headers: &HeaderMap) -> String {
    CLIENT_ADDRESS_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name)?.to_str().ok())
        .filter_map(|value| value.split(',').next())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Middleware state binding one limiter to a group of routes.
#[derive(Clone)]
pub struct RateLimitGuard {
    limiter: RateLimiter,
    decisions: Counter<u64>,
}

impl RateLimitGuard {
    pub fn new(limiter: RateLimiter) -> Self {
        let decisions = global::meter("agency-server")
            .u64_counter("rate_limit.decisions")
            .with_description("Rate limit decisions by policy and outcome")
            .build();

        Self { limiter, decisions }
    }
}

/// Count the request against the guard's limiter before running the handler.
///
/// Rejected requests get a 429 with `Retry-After` and never reach the handler.
/// Both outcomes carry the `X-RateLimit-*` headers.
pub async fn enforce(State(guard): State<RateLimitGuard>, req: Request, next: Next) -> Response {
    let identifier = client_identifier(req.headers());
    let decision = guard.limiter.check(&identifier);
    let policy = guard.limiter.name();

    let outcome = if decision.allowed { "allowed" } else { "rejected" };
    guard.decisions.add(
        1,
        &[
            KeyValue::new("policy", policy.as_str()),
            KeyValue::new("outcome", outcome),
        ],
    );

    let mut response = if decision.allowed {
        tracing::debug!(
            policy = %policy,
            client = %identifier,
            remaining = decision.remaining,
            "rate limit check passed"
        );
        next.run(req).await
    } else {
        // The window is still open at `reset_time_ms` itself, so never
        // advertise a zero wait.
        let retry_after_secs = decision.retry_after_secs(guard.limiter.now_ms()).max(1);
        tracing::warn!(
            policy = %policy,
            client = %identifier,
            retry_after_secs,
            "rate limit exceeded"
        );
        ServerError::RateLimited { retry_after_secs }.into_response()
    };

    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));

    let reset = i64::try_from(decision.reset_time_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true));
    if let Some(value) = reset.and_then(|s| HeaderValue::from_str(&s).ok()) {
        headers.insert(X_RATELIMIT_RESET, value);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agency_common::{PolicyName, RatePolicy};
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    use super::*;
    use crate::clock::ManualClock;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_client_identifier_prefers_forwarded_for() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
            ("cf-connecting-ip", "192.0.2.9"),
        ]);
        assert_eq!(client_identifier(&map), "203.0.113.7");
    }

    #[test]
    fn test_client_identifier_falls_through_headers() {
        let map = headers(&[("x-real-ip", " 198.51.100.2 "), ("cf-connecting-ip", "192.0.2.9")]);
        assert_eq!(client_identifier(&map), "198.51.100.2");

        let map = headers(&[("x-forwarded-for", " "), ("cf-connecting-ip", "192.0.2.9")]);
        assert_eq!(client_identifier(&map), "192.0.2.9");
    }

    #[test]
    fn test_client_identifier_unknown() {
        assert_eq!(client_identifier(&HeaderMap::new()), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_extract_bearer_token() {
        let map = headers(&[("authorization", "Bearer abc123")]);
        assert_eq!(extract_bearer_token(&map).as_deref(), Some("abc123"));

        let map = headers(&[("authorization", "Basic abc123")]);
        assert_eq!(extract_bearer_token(&map), None);
    }

    fn guarded_app(max: u32, clock: &ManualClock) -> Router {
        let policy = RatePolicy::new(max, 60_000).unwrap();
        let limiter =
            RateLimiter::with_clock(PolicyName::Contact, policy, Arc::new(clock.clone())).unwrap();

        Router::new()
            .route("/", get(|| async { "ok" }))
            .route_layer(axum::middleware::from_fn_with_state(
                RateLimitGuard::new(limiter),
                enforce,
            ))
    }

    fn request_from(ip: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_enforce_allows_and_reports_headers() {
        let clock = ManualClock::new(0);
        let app = guarded_app(3, &clock);

        let response = app.oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "3");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "2");
        assert_eq!(
            response.headers()[X_RATELIMIT_RESET],
            "1970-01-01T00:01:00.000Z"
        );
    }

    #[tokio::test]
    async fn test_enforce_rejects_with_retry_after() {
        let clock = ManualClock::new(0);
        let app = guarded_app(1, &clock);

        let response = app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        clock.set(1_500);
        let response = app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "59");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");

        // A different client is unaffected.
        let response = app.oneshot(request_from("5.6.7.8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejection_at_window_boundary_waits_at_least_one_second() {
        let clock = ManualClock::new(0);
        let app = guarded_app(1, &clock);

        let response = app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        clock.set(60_000);
        let response = app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");

        clock.set(61_000);
        let response = app.oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
