//! Market sync models
//!
//! - `price` - Price requests, snapshots and the price board
//! - `aum` - Assets-under-management aggregate (AumUpdate)
//! - `rate_limit` - Rate limit metadata shown to callers (RateLimitInfo)
//! - `session` - Resolved subject identity (Session)
//! - `push` - Events carried by push transports (PushMessage)

mod aum;
mod price;
mod push;
mod rate_limit;
mod session;

use chrono::{DateTime, Utc};

pub use aum::AumUpdate;
pub use price::{AssetType, PriceBatch, PriceBoard, PriceRequest, PriceSnapshot};
pub use push::PushMessage;
pub use rate_limit::RateLimitInfo;
pub use session::Session;

/// A value whose freshness can be compared.
///
/// Controllers and channels never replace a value with an older one.
pub trait Versioned {
    fn last_updated(&self) -> DateTime<Utc>;

    /// Whether `self` may replace `current`.
    fn supersedes(&self, current: &Self) -> bool {
        self.last_updated() >= current.last_updated()
    }
}
