//! Collaborator traits.
//!
//! The pipeline does not price anything itself. Prices, AUM totals and the
//! caller's identity all come from implementations of these traits.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::errors::SyncError;
use crate::models::{AumUpdate, PriceRequest, PriceSnapshot, RateLimitInfo, Session};

/// Prices returned by a [`PricingBackend`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendPrices {
    pub prices: Vec<PriceSnapshot>,

    /// Present when the backend enforces its own limits.
    /// Absence is not an error.
    pub rate_limit: Option<RateLimitInfo>,
}

/// Source of current prices.
///
/// Only ever called through the rate-limited
/// [`PricingGateway`](super::PricingGateway).
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
///
/// struct QuoteApi {
///     client: reqwest::Client,
/// }
///
/// #[async_trait]
/// impl PricingBackend for QuoteApi {
///     fn id(&self) -> &'static str {
///         "QUOTE_API"
///     }
///
///     async fn fetch_prices(
///         &self,
///         requests: &[PriceRequest],
///         credential: &str,
///     ) -> Result<BackendPrices, SyncError> {
///         // ... POST the symbols with `Authorization: Bearer {credential}`
///     }
/// }
/// ```
#[async_trait]
pub trait PricingBackend: Send + Sync {
    /// Identifier used in logs, e.g. "YAHOO".
    fn id(&self) -> &'static str;

    /// Fetch the latest price for each request.
    ///
    /// Symbols the backend does not know may be left out of the result.
    async fn fetch_prices(
        &self,
        requests: &[PriceRequest],
        credential: &str,
    ) -> Result<BackendPrices, SyncError>;
}

/// Valuation collaborator.
///
/// Assumed idempotent and free of side effects.
#[async_trait]
pub trait AumCalculator: Send + Sync {
    async fn compute_aum(
        &self,
        subject_id: &str,
        portfolio_id: Option<&str>,
    ) -> Result<AumUpdate, SyncError>;
}

/// Resolves the identity of the current caller.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The signed-in session, or `None` when nobody is authenticated.
    async fn current_session(&self) -> Option<Session>;
}

/// Session provider holding a session in memory.
///
/// Useful for services that authenticate once at startup, and for tests.
#[derive(Debug, Default)]
pub struct StaticSessionProvider {
    session: Mutex<Option<Session>>,
}

impl StaticSessionProvider {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    pub fn signed_in(subject_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self::new(Some(Session::new(subject_id, access_token)))
    }

    pub fn signed_out() -> Self {
        Self::new(None)
    }

    pub fn sign_in(&self, session: Session) {
        *self.lock() = Some(session);
    }

    pub fn sign_out(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn current_session(&self) -> Option<Session> {
        self.lock().clone()
    }
}
