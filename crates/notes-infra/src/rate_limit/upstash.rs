//! Upstash rate limiter - the sliding window script over the Upstash REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use notes_core::ports::{RateLimitDecision, RateLimitError, RateLimiter};

use super::script::{SLIDING_WINDOW_SCRIPT, decision_from_reply, request_member, unix_millis};
use crate::config::{RateLimitConfig, UpstashConfig};

/// Body of an Upstash REST reply.
#[derive(Debug, Deserialize)]
struct UpstashReply {
    #[serde(default)]
    result: Option<Vec<i64>>,
    #[serde(default)]
    error: Option<String>,
}

/// Rate limiter talking to Upstash Redis over HTTPS.
pub struct UpstashRateLimiter {
    client: reqwest::Client,
    config: UpstashConfig,
    limits: RateLimitConfig,
    key_prefix: String,
    request_timeout: Duration,
}

impl UpstashRateLimiter {
    pub fn new(
        config: UpstashConfig,
        limits: RateLimitConfig,
        key_prefix: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, RateLimitError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        tracing::info!(url = %config.url, "Using Upstash rate limiter");

        Ok(Self {
            client,
            config,
            limits,
            key_prefix: key_prefix.into(),
            request_timeout,
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// REST form of `EVAL script 1 key now window max member`.
    fn eval_command(&self, key: &str, now_ms: u64) -> serde_json::Value {
        serde_json::json!([
            "EVAL",
            SLIDING_WINDOW_SCRIPT,
            "1",
            self.make_key(key),
            now_ms.to_string(),
            (self.limits.window.as_millis() as u64).to_string(),
            self.limits.max_requests.to_string(),
            request_member(now_ms),
        ])
    }

    fn decision_from(&self, reply: UpstashReply) -> Result<RateLimitDecision, RateLimitError> {
        match reply {
            UpstashReply {
                error: Some(error), ..
            } => Err(RateLimitError::Backend(error)),
            UpstashReply {
                result: Some(result),
                ..
            } => decision_from_reply(&result, self.limits.max_requests),
            _ => Err(RateLimitError::Backend(
                "Upstash reply carried neither result nor error".to_string(),
            )),
        }
    }
}

#[async_trait]
impl RateLimiter for UpstashRateLimiter {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError> {
        let command = self.eval_command(key, unix_millis());

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.token)
            .json(&command)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RateLimitError::Timeout(self.request_timeout)
                } else {
                    RateLimitError::Backend(e.to_string())
                }
            })?;

        let status = response.status();
        let reply: UpstashReply = response
            .json()
            .await
            .map_err(|e| RateLimitError::Backend(format!("HTTP {}: {}", status, e)))?;

        self.decision_from(reply)
    }

    fn backend(&self) -> &'static str {
        "upstash"
    }
}
