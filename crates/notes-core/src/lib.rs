//! # Notes Core
//!
//! The domain layer of the notes backend.
//! This crate contains request-admission types and the ports that
//! infrastructure implements, with zero infrastructure dependencies.

pub mod domain;
pub mod error;
pub mod ports;

pub use error::ConfigError;
