//! Application state - shared across all handlers.

use std::sync::Arc;

use notes_core::ports::RateLimitError;
use notes_infra::AdmissionController;

use crate::config::AppConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionController>,
    pub rate_limit_enabled: bool,
}

impl AppState {
    /// Build the application state, connecting the configured rate limiter.
    pub async fn new(config: &AppConfig) -> Result<Self, RateLimitError> {
        let admission = Arc::new(AdmissionController::connect(&config.rate_limit).await?);

        if !config.rate_limit_enabled {
            tracing::warn!("Rate limiting disabled. All requests will be admitted.");
        }

        tracing::info!("Application state initialized");

        Ok(Self {
            admission,
            rate_limit_enabled: config.rate_limit_enabled,
        })
    }
}
