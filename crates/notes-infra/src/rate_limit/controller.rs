//! Admission controller - the single gate every request passes through.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use notes_core::domain::IdentityKeyStrategy;
use notes_core::ports::{RateLimitDecision, RateLimitError, RateLimiter};

use super::memory::InMemoryRateLimiter;
use crate::config::{AdmissionConfig, BackendConfig};

/// Decides per request whether it may reach downstream handlers.
///
/// Failure policy is fail-open: when the counting backend errors or does not
/// answer within `check_timeout`, the request is admitted, the failure is
/// logged at `error` level and counted in [`fail_open_total`](Self::fail_open_total).
pub struct AdmissionController {
    limiter: Arc<dyn RateLimiter>,
    identity: IdentityKeyStrategy,
    limit: u32,
    check_timeout: Duration,
    fail_open: AtomicU64,
}

impl AdmissionController {
    pub fn new(limiter: Arc<dyn RateLimiter>, identity: IdentityKeyStrategy, limit: u32) -> Self {
        Self {
            limiter,
            identity,
            limit,
            check_timeout: Duration::from_secs(2),
            fail_open: AtomicU64::new(0),
        }
    }

    pub fn with_check_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self
    }

    /// Build the counting strategy named by `config` and wrap it.
    ///
    /// The strategy is chosen here once; it is never re-decided per request.
    pub async fn connect(config: &AdmissionConfig) -> Result<Self, RateLimitError> {
        config.rate_limit.validate()?;

        let limiter: Arc<dyn RateLimiter> = match &config.backend {
            BackendConfig::Memory => Self::memory_limiter(config),
            BackendConfig::Redis(redis) => Self::redis_limiter(config, redis).await?,
            BackendConfig::Upstash(upstash) => Self::upstash_limiter(config, upstash)?,
        };

        tracing::info!(
            backend = limiter.backend(),
            max_requests = config.rate_limit.max_requests,
            window_ms = config.rate_limit.window.as_millis() as u64,
            identity = ?config.identity,
            "Admission controller ready"
        );

        Ok(
            Self::new(limiter, config.identity.clone(), config.rate_limit.max_requests)
                .with_check_timeout(config.check_timeout),
        )
    }

    fn memory_limiter(config: &AdmissionConfig) -> Arc<dyn RateLimiter> {
        let limiter = Arc::new(InMemoryRateLimiter::new(config.rate_limit.clone()));
        limiter.spawn_sweeper(config.sweep_interval);
        limiter
    }

    #[cfg(feature = "redis")]
    async fn redis_limiter(
        config: &AdmissionConfig,
        redis: &crate::config::RedisConfig,
    ) -> Result<Arc<dyn RateLimiter>, RateLimitError> {
        match super::RedisRateLimiter::new(redis, config.rate_limit.clone(), &config.key_prefix)
            .await
        {
            Ok(limiter) => Ok(Arc::new(limiter)),
            Err(e) if redis.fallback_to_memory => {
                tracing::warn!(
                    error = %e,
                    "Redis rate limiter unavailable. Falling back to in-memory limiter."
                );
                Ok(Self::memory_limiter(config))
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(not(feature = "redis"))]
    async fn redis_limiter(
        _config: &AdmissionConfig,
        _redis: &crate::config::RedisConfig,
    ) -> Result<Arc<dyn RateLimiter>, RateLimitError> {
        Err(notes_core::ConfigError::invalid(
            "RATE_LIMIT_BACKEND",
            "redis",
            "built without the redis feature",
        )
        .into())
    }

    #[cfg(feature = "upstash")]
    fn upstash_limiter(
        config: &AdmissionConfig,
        upstash: &crate::config::UpstashConfig,
    ) -> Result<Arc<dyn RateLimiter>, RateLimitError> {
        let limiter = super::UpstashRateLimiter::new(
            upstash.clone(),
            config.rate_limit.clone(),
            &config.key_prefix,
            config.check_timeout,
        )?;
        Ok(Arc::new(limiter))
    }

    #[cfg(not(feature = "upstash"))]
    fn upstash_limiter(
        _config: &AdmissionConfig,
        _upstash: &crate::config::UpstashConfig,
    ) -> Result<Arc<dyn RateLimiter>, RateLimitError> {
        Err(notes_core::ConfigError::invalid(
            "RATE_LIMIT_BACKEND",
            "upstash",
            "built without the upstash feature",
        )
        .into())
    }

    /// Derive the caller identity, count the request and decide.
    ///
    /// Never fails: backend errors and timeouts admit the request.
    pub async fn check_and_admit(&self, caller_address: Option<&str>) -> RateLimitDecision {
        let identity = self.identity.resolve(caller_address);

        let check = self.limiter.check(identity.as_str());
        let outcome = tokio::time::timeout(self.check_timeout, check)
            .await
            .unwrap_or(Err(RateLimitError::Timeout(self.check_timeout)));

        match outcome {
            Ok(decision) => {
                if !decision.admitted {
                    tracing::warn!(
                        caller = %identity,
                        limit = decision.limit,
                        retry_after_secs = decision.retry_after_secs(),
                        "Rate limit exceeded"
                    );
                }
                decision
            }
            Err(e) => {
                self.fail_open.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    caller = %identity,
                    backend = self.limiter.backend(),
                    error = %e,
                    "Rate limiter error, failing open"
                );
                RateLimitDecision::fail_open(self.limit)
            }
        }
    }

    pub fn backend(&self) -> &'static str {
        self.limiter.backend()
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Requests admitted because the backend could not decide.
    pub fn fail_open_total(&self) -> u64 {
        self.fail_open.load(Ordering::Relaxed)
    }
}
