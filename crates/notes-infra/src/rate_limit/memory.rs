//! In-memory sliding window rate limiter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use notes_core::ports::{Clock, RateLimitDecision, RateLimitError, RateLimiter, SystemClock};

use crate::config::RateLimitConfig;

/// In-memory rate limiter keeping a timestamp log per identity.
///
/// This is the fallback when no remote counter is configured.
/// Note: Limits are per-process, not distributed across instances,
/// and are reset on restart.
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl InMemoryRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Drop timestamps that have left the window ending at `now`.
    fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = timestamps.front() {
            if now.saturating_duration_since(oldest) < window {
                break;
            }
            timestamps.pop_front();
        }
    }

    fn reset_after(timestamps: &VecDeque<Instant>, now: Instant, window: Duration) -> Duration {
        timestamps
            .front()
            .map(|&oldest| (oldest + window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Evict identities with no requests left in the window.
    ///
    /// Returns the number of identities removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let window = self.config.window;
        let mut windows = self.windows.lock().await;

        let before = windows.len();
        windows.retain(|_, timestamps| {
            Self::prune(timestamps, now, window);
            !timestamps.is_empty()
        });
        let evicted = before - windows.len();

        tracing::debug!(evicted, remaining = windows.len(), "Rate limit sweep complete");
        evicted
    }

    /// Number of identities currently holding window state.
    pub async fn tracked_identities(&self) -> usize {
        self.windows.lock().await.len()
    }

    /// Run [`sweep`](Self::sweep) every `every` until the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match limiter.upgrade() {
                    Some(limiter) => {
                        limiter.sweep().await;
                    }
                    None => break,
                }
            }
        })
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError> {
        let now = self.clock.now();
        let RateLimitConfig {
            max_requests,
            window,
        } = self.config;

        // Prune, compare and append all happen under one lock.
        let mut windows = self.windows.lock().await;
        let timestamps = windows.entry(key.to_string()).or_default();
        Self::prune(timestamps, now, window);

        if timestamps.len() >= max_requests as usize {
            return Ok(RateLimitDecision::rejected(
                max_requests,
                Self::reset_after(timestamps, now, window),
            ));
        }

        timestamps.push_back(now);
        let remaining = max_requests.saturating_sub(timestamps.len() as u32);

        Ok(RateLimitDecision::admitted(
            max_requests,
            remaining,
            Self::reset_after(timestamps, now, window),
        ))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
