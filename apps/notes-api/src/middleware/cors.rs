//! CORS for the browser frontend.

use actix_cors::Cors;
use actix_web::http::header::{HeaderName, RETRY_AFTER};

/// Allow `origin` to call the API and read the rate limit headers.
///
/// Wrap this outside the rate limiter: preflight requests are answered here
/// and never counted.
pub fn cors(origin: &str) -> Cors {
    Cors::default()
        .allowed_origin(origin)
        .allow_any_method()
        .allow_any_header()
        .expose_headers([
            RETRY_AFTER,
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
        ])
        .max_age(3600)
}
