//! Rate limiting port.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ConfigError;

/// Counting strategy - abstraction over rate limiting backends.
///
/// Implementations perform prune, compare and append for `key` as one atomic
/// step, so concurrent checks on the same key never admit more than the
/// configured limit.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count a request against `key` and decide whether it is admitted.
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError>;

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}

/// Result of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub admitted: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the oldest counted request leaves the window.
    pub reset_after: Duration,
    /// Admitted without counting because the backend could not answer.
    /// `remaining` carries no information then.
    pub fail_open: bool,
}

impl RateLimitDecision {
    pub fn admitted(limit: u32, remaining: u32, reset_after: Duration) -> Self {
        Self {
            admitted: true,
            limit,
            remaining,
            reset_after,
            fail_open: false,
        }
    }

    pub fn rejected(limit: u32, reset_after: Duration) -> Self {
        Self {
            admitted: false,
            limit,
            remaining: 0,
            reset_after,
            fail_open: false,
        }
    }

    /// Decision used when the counting backend could not answer.
    pub fn fail_open(limit: u32) -> Self {
        Self {
            fail_open: true,
            ..Self::admitted(limit, limit, Duration::ZERO)
        }
    }

    /// `reset_after` rounded up to whole seconds, as sent in `Retry-After`.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Rate limit errors.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend did not answer within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
