//! Health check endpoint.

use actix_web::{HttpResponse, web};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub rate_limiter: RateLimiterStatus,
}

#[derive(Serialize)]
pub struct RateLimiterStatus {
    pub enabled: bool,
    pub backend: &'static str,
    pub limit: u32,
    pub fail_open_total: u64,
}

/// Health check endpoint - returns server and rate limiter status.
///
/// GET /api/health
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let response = HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        rate_limiter: RateLimiterStatus {
            enabled: state.rate_limit_enabled,
            backend: state.admission.backend(),
            limit: state.admission.limit(),
            fail_open_total: state.admission.fail_open_total(),
        },
    };

    HttpResponse::Ok().json(response)
}
