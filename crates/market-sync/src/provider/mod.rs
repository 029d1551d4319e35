//! Collaborators and the rate-limited fetch path.
//!
//! - `traits` - Backend, calculator and session provider traits
//! - `validator` - Request and payload validation
//! - `cache` - Short-lived price cache
//! - `gateway` - Rate-limited fetch path used by channels and controllers
//! - `mock` - Scripted collaborators for tests

mod cache;
mod gateway;
mod mock;
mod traits;
mod validator;

pub use cache::{PriceCache, DEFAULT_PRICE_CACHE_TTL};
pub use gateway::{PricingGateway, AUM_SCOPE, PRICES_SCOPE};
pub use mock::{MockAumCalculator, MockPricingBackend};
pub use traits::{
    AumCalculator, BackendPrices, PricingBackend, SessionProvider, StaticSessionProvider,
};
pub use validator::{RequestValidator, ValidatorConfig};
