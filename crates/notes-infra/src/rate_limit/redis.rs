//! Redis rate limiter implementation using a sliding window log.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};

use notes_core::ports::{RateLimitDecision, RateLimitError, RateLimiter};

use super::script::{SLIDING_WINDOW_SCRIPT, decision_from_reply, request_member, unix_millis};
use crate::config::{RateLimitConfig, RedisConfig};

/// Redis-backed rate limiter.
///
/// Each identity is a sorted set of request timestamps; the Lua script keeps
/// the prune/compare/append atomic across every server instance.
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    limits: RateLimitConfig,
    key_prefix: String,
    script: Script,
}

impl RedisRateLimiter {
    pub async fn new(
        redis: &RedisConfig,
        limits: RateLimitConfig,
        key_prefix: impl Into<String>,
    ) -> Result<Self, RateLimitError> {
        let client =
            Client::open(redis.url.as_str()).map_err(|e| RateLimitError::Backend(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(redis.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| RateLimitError::Timeout(redis.connect_timeout))?
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        tracing::info!(url = %redis.url, "Connected to Redis rate limiter");

        Ok(Self {
            conn,
            limits,
            key_prefix: key_prefix.into(),
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError> {
        let redis_key = self.make_key(key);
        let mut conn = self.conn.clone();
        let now_ms = unix_millis();

        let reply: Vec<i64> = self
            .script
            .key(&redis_key)
            .arg(now_ms)
            .arg(self.limits.window.as_millis() as u64)
            .arg(self.limits.max_requests)
            .arg(request_member(now_ms))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        decision_from_reply(&reply, self.limits.max_requests)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn get_test_ratelimiter(prefix: &str) -> Option<RedisRateLimiter> {
        let redis = RedisConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6389".to_string()),
            connect_timeout: Duration::from_secs(1),
            fallback_to_memory: false,
        };
        let limits = RateLimitConfig::new(2, Duration::from_secs(1)).unwrap();

        RedisRateLimiter::new(&redis, limits, prefix).await.ok()
    }

    #[tokio::test]
    async fn test_redis_ratelimiter() {
        let prefix = format!("test_ratelimit_{}", uuid::Uuid::new_v4().simple());
        let limiter = match get_test_ratelimiter(&prefix).await {
            Some(l) => l,
            None => {
                tracing::warn!("Redis not available, skipping test");
                return;
            }
        };

        let key = "test_user_1";

        // First request - allowed
        let res = limiter.check(key).await.unwrap();
        assert!(res.admitted);
        assert_eq!(res.remaining, 1);

        // Second request - allowed
        let res = limiter.check(key).await.unwrap();
        assert!(res.admitted);
        assert_eq!(res.remaining, 0);

        // Third request - rejected
        let res = limiter.check(key).await.unwrap();
        assert!(!res.admitted);

        // Other identities keep their own window
        assert!(limiter.check("test_user_2").await.unwrap().admitted);

        // Wait for the window to slide past both requests
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let res = limiter.check(key).await.unwrap();
        assert!(res.admitted);
    }
}
