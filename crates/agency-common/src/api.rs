use serde::{Deserialize, Serialize};

use crate::policy::PolicyName;

/// Error kind reported in the body of a 429 response.
pub const RATE_LIMITED_ERROR: &str = "rate_limited";

/// JSON body returned for every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request body for POST /api/v1/contact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

/// Response from POST /api/v1/contact
#[derive(Debug, Serialize, Deserialize)]
pub struct ContactResponse {
    pub status: String,
}

/// Request body for POST /api/v1/auth/login
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Response from POST /api/v1/auth/login
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    /// RFC 3339 timestamp after which the token is no longer accepted.
    pub expires_at: String,
}

/// Response from POST /api/v1/uploads
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
    pub path: String,
    pub bytes: u64,
}

/// One entry of GET /api/v1/admin/rate-limits
#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitSummary {
    pub policy: PolicyName,
    pub max_requests: u32,
    pub window_ms: u64,
    pub tracked_identifiers: usize,
}

/// Response from GET /api/v1/admin/rate-limits
#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitsResponse {
    pub limits: Vec<RateLimitSummary>,
}

/// Response from GET /api/v1/health
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
