//! Admission control for the pricing backend.
//!
//! - Key-scoped fixed windows with an optional punitive block
//! - Named policies for prices, AUM and generic reads
//! - Background cleanup bounding memory to active keys

mod policy;
mod rate_limiter;

pub use policy::{scoped_key, RateLimitConfig};
pub use rate_limiter::{
    RateLimitDecision, RateLimitStatus, RateLimiter, RateLimiterStats, DEFAULT_CLEANUP_INTERVAL,
};
