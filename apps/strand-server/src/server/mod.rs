pub(crate) mod auth;
pub(crate) mod auth_repository;
pub(crate) mod core;
pub(crate) mod errors;
pub(crate) mod handlers;
pub(crate) mod hasher;
pub(crate) mod lockout;
pub(crate) mod mail;
pub(crate) mod metrics;
pub(crate) mod partition;
pub(crate) mod rate_limit;
pub(crate) mod router;
#[cfg(test)]
mod tests;
pub(crate) mod types;

pub use self::core::AppConfig;
pub use self::errors::init_tracing;
pub use self::hasher::{DigestAlgorithm, HasherConfig};
pub use self::lockout::LockoutPolicy;
pub use self::rate_limit::{FixedWindowPolicy, RateLimitSettings, SlidingWindowPolicy};
pub use self::router::build_router;
