use agency_common::api::HealthResponse;
use axum::Json;

#[tracing::instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
