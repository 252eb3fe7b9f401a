use std::fmt;

/// Key used when a request carries no usable caller address.
pub const ANONYMOUS_CALLER: &str = "anonymous";

/// Shared bucket key used by [`IdentityKeyStrategy::Constant`] unless configured.
pub const DEFAULT_CONSTANT_KEY: &str = "my-rate-limit";

/// Key partitioning rate-limit counters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a [`CallerIdentity`] is derived from an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdentityKeyStrategy {
    /// One counter per caller address.
    #[default]
    PerCaller,
    /// Every caller shares the counter stored under this key.
    Constant(String),
}

impl IdentityKeyStrategy {
    /// Derive the identity for a request whose caller address is `caller_address`.
    ///
    /// Missing or blank addresses resolve to [`ANONYMOUS_CALLER`] so the
    /// request is still counted rather than failed.
    pub fn resolve(&self, caller_address: Option<&str>) -> CallerIdentity {
        match self {
            Self::Constant(key) => CallerIdentity::new(key.as_str()),
            Self::PerCaller => {
                let key = caller_address
                    .map(str::trim)
                    .filter(|addr| !addr.is_empty())
                    .unwrap_or(ANONYMOUS_CALLER);
                CallerIdentity::new(key)
            }
        }
    }
}
