//! Sliding window log shared by the Redis-speaking backends.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notes_core::ports::{RateLimitDecision, RateLimitError};

/// Atomic prune/compare/append over a sorted set of request timestamps.
///
/// KEYS[1] = counter key
/// ARGV    = now_ms, window_ms, max_requests, member
/// Returns   {admitted (0|1), count, reset_ms}
pub(crate) const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now_ms = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local max_requests = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now_ms - window_ms)

local count = redis.call('ZCARD', key)
local admitted = 0
if count < max_requests then
    redis.call('ZADD', key, now_ms, ARGV[4])
    redis.call('PEXPIRE', key, window_ms)
    count = count + 1
    admitted = 1
end

local reset_ms = 0
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
    reset_ms = tonumber(oldest[2]) + window_ms - now_ms
end

return {admitted, count, reset_ms}
"#;

/// Milliseconds since the Unix epoch, the score unit of the sorted set.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Unique sorted-set member for one request.
pub(crate) fn request_member(now_ms: u64) -> String {
    format!("{}-{}", now_ms, uuid::Uuid::new_v4().simple())
}

/// Interpret the script reply.
pub(crate) fn decision_from_reply(
    reply: &[i64],
    limit: u32,
) -> Result<RateLimitDecision, RateLimitError> {
    let [admitted, count, reset_ms] = reply else {
        return Err(RateLimitError::Backend(format!(
            "Unexpected rate limit reply: {:?}",
            reply
        )));
    };

    let reset_after = Duration::from_millis((*reset_ms).max(0) as u64);
    match *admitted {
        1 => {
            let count = u32::try_from(*count).unwrap_or(u32::MAX);
            Ok(RateLimitDecision::admitted(
                limit,
                limit.saturating_sub(count),
                reset_after,
            ))
        }
        0 => Ok(RateLimitDecision::rejected(limit, reset_after)),
        other => Err(RateLimitError::Backend(format!(
            "Unexpected admission flag: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admitted_reply() {
        let decision = decision_from_reply(&[1, 3, 60_000], 100).unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 97);
        assert_eq!(decision.reset_after, Duration::from_secs(60));
    }

    #[test]
    fn test_rejected_reply() {
        let decision = decision_from_reply(&[0, 100, 1_500], 100).unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_secs(), 2);
    }

    #[test]
    fn test_malformed_reply_is_backend_error() {
        assert!(matches!(
            decision_from_reply(&[1, 2], 100),
            Err(RateLimitError::Backend(_))
        ));
        assert!(matches!(
            decision_from_reply(&[7, 2, 0], 100),
            Err(RateLimitError::Backend(_))
        ));
    }

    #[test]
    fn test_members_are_unique() {
        assert_ne!(request_member(42), request_member(42));
    }
}
