//! Domain entities - the core admission objects.

mod identity;

pub use identity::{ANONYMOUS_CALLER, CallerIdentity, DEFAULT_CONSTANT_KEY, IdentityKeyStrategy};
