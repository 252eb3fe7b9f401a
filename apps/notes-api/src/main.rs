//! # Notes API Server
//!
//! The main entry point for the Actix-web HTTP server.

use actix_web::{App, HttpServer, middleware::Condition, web};
use tracing_actix_web::TracingLogger;

mod config;
mod handlers;
mod middleware;
mod state;
mod telemetry;

use config::AppConfig;
use middleware::{RateLimitMiddleware, cors};
use state::AppState;
use telemetry::TelemetryConfig;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    telemetry::init_telemetry(&TelemetryConfig::from_env());

    // Configuration errors are fatal at startup
    let config = AppConfig::from_env()?;

    tracing::info!("Starting Notes API on {}:{}", config.host, config.port);

    let state = AppState::new(&config).await?;
    let trust_forwarded_headers = config.trust_forwarded_headers;
    let cors_origin = config.cors_origin.clone();

    HttpServer::new(move || {
        let rate_limit = RateLimitMiddleware::new(state.admission.clone())
            .trust_forwarded_headers(trust_forwarded_headers);

        App::new()
            .wrap(Condition::new(state.rate_limit_enabled, rate_limit))
            .wrap(cors(&cors_origin))
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(handlers::configure_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
