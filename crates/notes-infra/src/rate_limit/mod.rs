//! Rate limiting implementations and the admission controller.

mod controller;
mod memory;

pub use controller::AdmissionController;
pub use memory::InMemoryRateLimiter;

#[cfg(any(feature = "redis", feature = "upstash"))]
mod script;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::RedisRateLimiter;

#[cfg(feature = "upstash")]
mod upstash;
#[cfg(feature = "upstash")]
pub use upstash::UpstashRateLimiter;
