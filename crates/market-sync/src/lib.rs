//! Meridian Market Sync Crate
//!
//! Keeps a client's assets-under-management figure and a board of live
//! prices fresh, while protecting the pricing backend from request storms.
//!
//! # Overview
//!
//! The crate provides:
//! - A process-wide, key-scoped rate limiter with punitive blocking
//! - A rate-limited gateway in front of the pricing and valuation collaborators
//! - Push subscriptions delivering ordered AUM updates
//! - Per-consumer controllers merging pushes, fallback refreshes and manual
//!   refreshes, with cancellation and last-request-wins semantics
//!
//! # Architecture
//!
//! ```text
//! +------------------+        +------------------+
//! |  PushTransport   | -----> | RealtimeChannel  |  (ordered AUM deliveries)
//! +------------------+        +------------------+
//!                                      |
//!                                      v
//!                             +------------------+
//!                             |  SyncController  |  (actor, watch-published view)
//!                             +------------------+
//!                                      |
//!                                      v
//!                             +------------------+
//!                             |  PricingGateway  |  (validation, cache)
//!                             +------------------+
//!                                      |
//!                                      v
//!                             +------------------+
//!                             |   RateLimiter    |  (shared key space)
//!                             +------------------+
//!                                      |
//!                                      v
//!                     +----------------------------------+
//!                     |  PricingBackend / AumCalculator  |  (collaborators)
//!                     +----------------------------------+
//! ```
//!
//! # Core Types
//!
//! - [`RateLimiter`] - Fixed-window admission control per key
//! - [`PricingGateway`] - The only path to the collaborators
//! - [`RealtimeChannel`] - Push subscription for one subject
//! - [`SyncController`] - Keeps one value fresh; see [`AumSync`] and [`PriceSync`]
//! - [`SyncError`] - Errors, classified by [`ErrorClass`]

pub mod channel;
pub mod clock;
pub mod config;
pub mod errors;
pub mod limiter;
pub mod models;
pub mod provider;
pub mod sync;

pub use channel::{
    aum_topic, BroadcastTransport, PushTransport, RealtimeChannel, SubscriptionHandle, UpdateSink,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use errors::{ErrorClass, SyncError};
pub use limiter::{
    scoped_key, RateLimitConfig, RateLimitDecision, RateLimitStatus, RateLimiter, RateLimiterStats,
};
pub use models::{
    AssetType, AumUpdate, PriceBatch, PriceBoard, PriceRequest, PriceSnapshot, PushMessage,
    RateLimitInfo, Session, Versioned,
};
pub use provider::{
    AumCalculator, BackendPrices, PricingBackend, PricingGateway, SessionProvider,
    StaticSessionProvider,
};
pub use sync::{AumSource, AumSync, PriceSource, PriceSync, SyncController, SyncPhase, SyncView};
