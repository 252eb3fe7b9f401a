//! # Notes Infrastructure
//!
//! Concrete implementations of the ports defined in `notes-core`.
//! This crate contains the rate limiting backends and the admission
//! controller that fronts them.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external services, in-memory only
//! - `redis` - Redis-backed sliding window counter
//! - `upstash` - Upstash REST-backed sliding window counter

pub mod config;
pub mod rate_limit;

pub use config::{AdmissionConfig, BackendConfig, RateLimitConfig, RedisConfig, UpstashConfig};
pub use rate_limit::{AdmissionController, InMemoryRateLimiter};

#[cfg(feature = "redis")]
pub use rate_limit::RedisRateLimiter;
#[cfg(feature = "upstash")]
pub use rate_limit::UpstashRateLimiter;
