//! Application configuration loaded from environment variables.

use std::env;

use notes_core::ConfigError;
use notes_infra::AdmissionConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub rate_limit: AdmissionConfig,
    pub rate_limit_enabled: bool,
    /// Derive caller identity from `X-Forwarded-For`/`Forwarded` headers.
    pub trust_forwarded_headers: bool,
    /// Browser origin allowed to call the API.
    pub cors_origin: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let rate_limit = AdmissionConfig::from_env()?;
        let rate_limit_enabled = rate_limit_enabled(
            env::var("RATE_LIMIT_ENABLED").ok().as_deref(),
            env::var("APP_ENV").ok().as_deref(),
            rate_limit.backend.is_remote(),
        );

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::invalid("PORT", raw, "not a port number"))?,
            Err(_) => 5001,
        };

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port,
            rate_limit,
            rate_limit_enabled,
            trust_forwarded_headers: env::var("TRUST_FORWARDED_HEADERS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            cors_origin: env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
        })
    }
}

/// An explicit `RATE_LIMIT_ENABLED` wins. Otherwise rate limiting is on,
/// except in development when no remote counter is configured.
fn rate_limit_enabled(explicit: Option<&str>, app_env: Option<&str>, remote: bool) -> bool {
    match explicit {
        Some(v) => v != "false" && v != "0",
        None => remote || app_env != Some("development"),
    }
}
