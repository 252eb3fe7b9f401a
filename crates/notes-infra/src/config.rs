//! Rate limiting configuration loaded from environment variables.
//!
//! `AdmissionConfig::from_env` reads the process environment. The
//! `from_lookup` constructors read through a closure instead, so tests never
//! touch the process environment.

use std::str::FromStr;
use std::time::Duration;

use notes_core::ConfigError;
use notes_core::domain::{DEFAULT_CONSTANT_KEY, IdentityKeyStrategy};

/// Environment lookup used by the `from_lookup` constructors.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_or<T: FromStr>(
    lookup: Lookup<'_>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(name, raw, "not a number")),
        None => Ok(default),
    }
}

fn flag_or(lookup: Lookup<'_>, name: &'static str, default: bool) -> bool {
    lookup(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

/// Window limits shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum admitted requests per identity per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, ConfigError> {
        let config = Self {
            max_requests,
            window,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let window_ms = parse_or(
            lookup,
            "RATE_LIMIT_WINDOW_MS",
            defaults.window.as_millis() as u64,
        )?;
        Self::new(
            parse_or(lookup, "RATE_LIMIT_MAX_REQUESTS", defaults.max_requests)?,
            Duration::from_millis(window_ms),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::invalid(
                "RATE_LIMIT_MAX_REQUESTS",
                "0",
                "must be at least 1",
            ));
        }
        if self.window.is_zero() {
            return Err(ConfigError::invalid(
                "RATE_LIMIT_WINDOW_MS",
                "0",
                "must be at least 1ms",
            ));
        }
        Ok(())
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Whether to fall back to the in-memory limiter if Redis is unavailable
    pub fallback_to_memory: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            fallback_to_memory: true,
        }
    }
}

impl RedisConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            url: lookup("REDIS_URL").unwrap_or(defaults.url),
            connect_timeout: Duration::from_secs(parse_or(
                lookup,
                "REDIS_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )?),
            fallback_to_memory: flag_or(
                lookup,
                "REDIS_FALLBACK_TO_MEMORY",
                defaults.fallback_to_memory,
            ),
        })
    }
}

/// Upstash Redis REST configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstashConfig {
    /// REST endpoint (e.g., https://eu1-example.upstash.io)
    pub url: String,
    /// Bearer token for the REST endpoint
    pub token: String,
}

impl UpstashConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let url = lookup("UPSTASH_REDIS_REST_URL").ok_or(ConfigError::Missing {
            name: "UPSTASH_REDIS_REST_URL",
        })?;
        let token = lookup("UPSTASH_REDIS_REST_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing {
                name: "UPSTASH_REDIS_REST_TOKEN",
            })?;
        Ok(Self { url, token })
    }
}

/// Which counting strategy backs the admission controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Memory,
    Redis(RedisConfig),
    Upstash(UpstashConfig),
}

impl BackendConfig {
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Memory)
    }

    /// `RATE_LIMIT_BACKEND` wins; otherwise Upstash, then Redis, are chosen
    /// when their URL is set.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let explicit = lookup("RATE_LIMIT_BACKEND").map(|v| v.trim().to_lowercase());
        let name = match explicit {
            Some(name) => name,
            None if lookup("UPSTASH_REDIS_REST_URL").is_some() => "upstash".to_string(),
            None if lookup("REDIS_URL").is_some() => "redis".to_string(),
            None => "memory".to_string(),
        };

        match name.as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis(RedisConfig::from_lookup(lookup)?)),
            "upstash" => Ok(Self::Upstash(UpstashConfig::from_lookup(lookup)?)),
            _ => Err(ConfigError::invalid(
                "RATE_LIMIT_BACKEND",
                name,
                "expected memory, redis or upstash",
            )),
        }
    }
}

/// Full admission controller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionConfig {
    pub rate_limit: RateLimitConfig,
    pub backend: BackendConfig,
    pub identity: IdentityKeyStrategy,
    /// Prefix for remote counter keys.
    pub key_prefix: String,
    /// Upper bound on a single check before failing open.
    pub check_timeout: Duration,
    /// How often the in-memory limiter evicts idle identities.
    pub sweep_interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            backend: BackendConfig::Memory,
            identity: IdentityKeyStrategy::PerCaller,
            key_prefix: "ratelimit".to_string(),
            check_timeout: Duration::from_secs(2),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl AdmissionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let identity = match lookup("RATE_LIMIT_KEY_STRATEGY").as_deref().map(str::trim) {
            None | Some("per-caller") => IdentityKeyStrategy::PerCaller,
            Some("constant") => IdentityKeyStrategy::Constant(
                lookup("RATE_LIMIT_CONSTANT_KEY")
                    .unwrap_or_else(|| DEFAULT_CONSTANT_KEY.to_string()),
            ),
            Some(other) => {
                return Err(ConfigError::invalid(
                    "RATE_LIMIT_KEY_STRATEGY",
                    other,
                    "expected per-caller or constant",
                ));
            }
        };

        let check_timeout_ms = parse_or(
            lookup,
            "RATE_LIMIT_TIMEOUT_MS",
            defaults.check_timeout.as_millis() as u64,
        )?;
        if check_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "RATE_LIMIT_TIMEOUT_MS",
                "0",
                "must be greater than zero",
            ));
        }
        let sweep_secs = parse_or(
            lookup,
            "RATE_LIMIT_SWEEP_SECS",
            defaults.sweep_interval.as_secs(),
        )?;

        Ok(Self {
            rate_limit: RateLimitConfig::from_lookup(lookup)?,
            backend: BackendConfig::from_lookup(lookup)?,
            identity,
            key_prefix: lookup("RATE_LIMIT_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            check_timeout: Duration::from_millis(check_timeout_ms),
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
        })
    }
}
