//! # Notes Shared
//!
//! Wire types shared between the notes backend and its clients.

pub mod response;

pub use response::ErrorResponse;
