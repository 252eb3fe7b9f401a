//! Domain-level error types.

use thiserror::Error;

/// Configuration errors - fatal at startup, never raised per request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {name}")]
    Missing { name: &'static str },

    #[error("Invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl ConfigError {
    pub fn invalid(name: &'static str, value: impl Into<String>, reason: &'static str) -> Self {
        Self::Invalid {
            name,
            value: value.into(),
            reason,
        }
    }
}
