//! Rate-limited access to the pricing and valuation collaborators.
//!
//! Every fetch issued by the sync layer goes through [`PricingGateway`]:
//!
//! ```text
//! cancel? -> rate limiter -> validation -> cache -> backend (batched) -> payload checks
//! ```
//!
//! A rejection by the limiter surfaces as [`SyncError::RateLimited`] with a
//! wait hint; the collaborators are not called in that case.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use super::cache::PriceCache;
use super::traits::{AumCalculator, PricingBackend};
use super::validator::RequestValidator;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::errors::SyncError;
use crate::limiter::{scoped_key, RateLimitConfig, RateLimitDecision, RateLimitStatus, RateLimiter};
use crate::models::{AumUpdate, PriceBatch, PriceRequest, Session};

/// Rate limit scope for price fetches.
pub const PRICES_SCOPE: &str = "prices";

/// Rate limit scope for AUM fetches.
pub const AUM_SCOPE: &str = "aum";

/// Symbols sent to the backend per call.
const BACKEND_BATCH_SIZE: usize = 10;

/// Rate-limited fetch path shared by every controller of a process.
pub struct PricingGateway {
    limiter: Arc<RateLimiter>,
    backend: Arc<dyn PricingBackend>,
    calculator: Arc<dyn AumCalculator>,
    prices_policy: RateLimitConfig,
    aum_policy: RateLimitConfig,
    validator: RequestValidator,
    cache: PriceCache,
}

impl PricingGateway {
    /// Create a gateway with the default policies and cache.
    pub fn new(
        limiter: Arc<RateLimiter>,
        backend: Arc<dyn PricingBackend>,
        calculator: Arc<dyn AumCalculator>,
    ) -> Self {
        Self::from_config(limiter, backend, calculator, &SyncConfig::default())
    }

    pub fn from_config(
        limiter: Arc<RateLimiter>,
        backend: Arc<dyn PricingBackend>,
        calculator: Arc<dyn AumCalculator>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            limiter,
            backend,
            calculator,
            prices_policy: config.prices_policy.clone(),
            aum_policy: config.aum_policy.clone(),
            validator: RequestValidator::new(),
            cache: PriceCache::new(config.price_cache_ttl, Arc::new(SystemClock)),
        }
    }

    /// Read cache expiry from `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cache = PriceCache::new(self.cache.ttl(), clock);
        self
    }

    pub fn with_validator(mut self, validator: RequestValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn calculator(&self) -> &Arc<dyn AumCalculator> {
        &self.calculator
    }

    pub fn validator(&self) -> &RequestValidator {
        &self.validator
    }

    pub fn prices_policy(&self) -> &RateLimitConfig {
        &self.prices_policy
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Number of prices currently held by the cache, expired or not.
    pub fn cached_prices(&self) -> usize {
        self.cache.len()
    }

    /// Remaining price quota for `subject_id`, without consuming it.
    pub fn price_quota(&self, subject_id: &str) -> RateLimitStatus {
        self.limiter.get_status(
            &scoped_key(PRICES_SCOPE, subject_id),
            &self.prices_policy,
        )
    }

    /// Fetch prices for `requests` on behalf of `session`.
    ///
    /// Cached prices are returned flagged `cached`; the rest are fetched from
    /// the backend in batches. The returned metadata is the backend's when it
    /// reports any, otherwise the gateway's own decision.
    pub async fn fetch_prices(
        &self,
        session: &Session,
        requests: &[PriceRequest],
        cancel: &CancellationToken,
    ) -> Result<PriceBatch, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let decision = self.admit(PRICES_SCOPE, &session.subject_id, &self.prices_policy)?;
        self.validator.validate_requests(requests)?;

        let purged = self.cache.purge_expired();
        if purged > 0 {
            debug!("Purged {} expired cached price(s)", purged);
        }

        let mut prices = Vec::with_capacity(requests.len());
        let mut uncached = Vec::new();
        for request in requests {
            match self.cache.get(request) {
                Some(snapshot) => prices.push(snapshot),
                None => uncached.push(request.clone()),
            }
        }

        let mut backend_limit = None;
        for chunk in uncached.chunks(BACKEND_BATCH_SIZE) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            debug!(
                "Fetching {} price(s) from {}",
                chunk.len(),
                self.backend.id()
            );
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                fetched = self.backend.fetch_prices(chunk, &session.access_token) => fetched?,
            };

            if fetched.rate_limit.is_some() {
                backend_limit = fetched.rate_limit;
            }

            for snapshot in fetched.prices {
                self.validator.validate_snapshot(&snapshot)?;
                let symbol = snapshot.symbol.to_uppercase();
                match chunk.iter().find(|r| r.symbol == symbol) {
                    Some(request) => {
                        self.cache.put(request, &snapshot);
                        prices.push(snapshot);
                    }
                    None => debug!(
                        "Dropping unrequested price for {} from {}",
                        snapshot.symbol,
                        self.backend.id()
                    ),
                }
            }
        }

        Ok(PriceBatch {
            prices,
            rate_limit: Some(backend_limit.unwrap_or_else(|| decision.info(&self.prices_policy))),
        })
    }

    /// Compute the AUM of `session`'s subject, optionally for one portfolio.
    pub async fn compute_aum(
        &self,
        session: &Session,
        portfolio_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AumUpdate, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        self.admit(AUM_SCOPE, &session.subject_id, &self.aum_policy)?;

        let update = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            update = self.calculator.compute_aum(&session.subject_id, portfolio_id) => update?,
        };
        self.validator.validate_aum(&update)?;
        Ok(update)
    }

    fn admit(
        &self,
        scope: &str,
        subject_id: &str,
        policy: &RateLimitConfig,
    ) -> Result<RateLimitDecision, SyncError> {
        let key = scoped_key(scope, subject_id);
        let decision = self.limiter.check_limit(&key, policy);
        if decision.allowed {
            return Ok(decision);
        }

        let retry_after = decision.retry_after.unwrap_or(Duration::ZERO);
        warn!(
            "Rate limit exceeded for '{}', retry in {}ms",
            key,
            retry_after.as_millis()
        );
        Err(SyncError::RateLimited {
            retry_after,
            reset_at: decision.reset_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{PriceSnapshot, RateLimitInfo};
    use crate::provider::{MockAumCalculator, MockPricingBackend};
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    struct Fixture {
        clock: Arc<ManualClock>,
        backend: MockPricingBackend,
        calculator: MockAumCalculator,
        gateway: PricingGateway,
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let clock = Arc::new(ManualClock::at_epoch());
        let backend = MockPricingBackend::new();
        let calculator = MockAumCalculator::returning(AumUpdate::empty("USD", clock.now()));
        let gateway = PricingGateway::from_config(
            Arc::new(RateLimiter::with_clock(clock.clone())),
            Arc::new(backend.clone()),
            Arc::new(calculator.clone()),
            &config,
        )
        .with_clock(clock.clone());

        for (symbol, price) in [("AAPL", dec!(190.25)), ("MSFT", dec!(415.10))] {
            backend.set_price(PriceSnapshot::new(symbol, price, "USD", clock.now(), "MOCK"));
        }

        Fixture {
            clock,
            backend,
            calculator,
            gateway,
        }
    }

    fn session() -> Session {
        Session::new("user-1", "token")
    }

    #[tokio::test]
    async fn test_fetch_prices_reports_gateway_quota() {
        let f = fixture(SyncConfig::default());
        let batch = f
            .gateway
            .fetch_prices(&session(), &[PriceRequest::equity("aapl")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(batch.prices.len(), 1);
        assert_eq!(batch.prices[0].price, dec!(190.25));
        assert!(!batch.prices[0].cached);

        let info = batch.rate_limit.unwrap();
        assert_eq!(info.limit, Some(20));
        assert_eq!(info.remaining, 19);
        assert_eq!(info.reset_at, f.clock.now() + chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_cache_hit_is_flagged_and_still_consumes_quota() {
        let f = fixture(SyncConfig::default());
        let requests = [PriceRequest::equity("AAPL")];
        let cancel = CancellationToken::new();

        f.gateway.fetch_prices(&session(), &requests, &cancel).await.unwrap();
        let second = f.gateway.fetch_prices(&session(), &requests, &cancel).await.unwrap();

        assert!(second.prices[0].cached);
        assert_eq!(f.backend.calls(), 1);
        assert_eq!(second.rate_limit.map(|i| i.remaining), Some(18));

        f.clock.advance(Duration::from_secs(31));
        let third = f.gateway.fetch_prices(&session(), &requests, &cancel).await.unwrap();
        assert!(!third.prices[0].cached);
        assert_eq!(f.backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_prices_are_purged_on_fetch() {
        let f = fixture(SyncConfig::default());
        let cancel = CancellationToken::new();

        for symbol in ["AAPL", "MSFT"] {
            f.gateway
                .fetch_prices(&session(), &[PriceRequest::equity(symbol)], &cancel)
                .await
                .unwrap();
        }
        assert_eq!(f.gateway.cached_prices(), 2);

        f.clock.advance(Duration::from_secs(31));
        f.gateway
            .fetch_prices(&session(), &[PriceRequest::equity("MSFT")], &cancel)
            .await
            .unwrap();

        assert_eq!(f.gateway.cached_prices(), 1);
    }

    #[tokio::test]
    async fn test_rejected_fetch_does_not_reach_backend() {
        let policy = RateLimitConfig::new(1, Duration::from_secs(60));
        let f = fixture(SyncConfig::default().with_prices_policy(policy));
        let requests = [PriceRequest::equity("AAPL")];
        let cancel = CancellationToken::new();

        f.gateway.fetch_prices(&session(), &requests, &cancel).await.unwrap();
        f.gateway.clear_cache();
        let err = f
            .gateway
            .fetch_prices(&session(), &requests, &cancel)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SyncError::RateLimited {
                retry_after: Duration::from_secs(60),
                reset_at: f.clock.now() + chrono::Duration::seconds(60),
            }
        );
        assert_eq!(f.backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_backend_metadata_is_preferred() {
        let f = fixture(SyncConfig::default());
        let backend_info = RateLimitInfo {
            limit: Some(100),
            remaining: 42,
            reset_at: DateTime::<Utc>::UNIX_EPOCH,
            retry_after: None,
        };
        f.backend.set_rate_limit(Some(backend_info.clone()));

        let batch = f
            .gateway
            .fetch_prices(&session(), &[PriceRequest::equity("MSFT")], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(batch.rate_limit, Some(backend_info));
    }

    #[tokio::test]
    async fn test_large_requests_are_sent_in_batches() {
        let f = fixture(SyncConfig::default());
        let requests: Vec<PriceRequest> =
            (0..25).map(|i| PriceRequest::equity(format!("SYM{i}"))).collect();

        let batch = f
            .gateway
            .fetch_prices(&session(), &requests, &CancellationToken::new())
            .await
            .unwrap();

        assert!(batch.prices.is_empty());
        let sizes: Vec<usize> = f.backend.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_is_not_dispatched() {
        let f = fixture(SyncConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = f
            .gateway
            .fetch_prices(&session(), &[PriceRequest::equity("AAPL")], &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, SyncError::Cancelled);
        assert_eq!(f.backend.calls(), 0);
        assert_eq!(f.gateway.price_quota("user-1").remaining, 20);
    }

    #[tokio::test]
    async fn test_invalid_symbol_is_rejected_before_dispatch() {
        let f = fixture(SyncConfig::default());
        let err = f
            .gateway
            .fetch_prices(&session(), &[PriceRequest::equity("A B")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidRequest(_)));
        assert_eq!(f.backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_backend_price_is_a_backend_failure() {
        let f = fixture(SyncConfig::default());
        f.backend
            .set_price(PriceSnapshot::new("AAPL", dec!(-3), "USD", f.clock.now(), "MOCK"));

        let err = f
            .gateway
            .fetch_prices(&session(), &[PriceRequest::equity("AAPL")], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::BackendFailure(_)));
    }

    #[tokio::test]
    async fn test_compute_aum_uses_its_own_policy() {
        let f = fixture(SyncConfig::default());
        let cancel = CancellationToken::new();

        for _ in 0..10 {
            f.gateway.compute_aum(&session(), None, &cancel).await.unwrap();
        }
        let err = f.gateway.compute_aum(&session(), None, &cancel).await.unwrap_err();

        assert!(matches!(err, SyncError::RateLimited { .. }));
        assert_eq!(f.calculator.calls(), 10);
        assert_eq!(f.gateway.price_quota("user-1").remaining, 20);
    }

    #[tokio::test]
    async fn test_compute_aum_cancelled_in_flight() {
        let f = fixture(SyncConfig::default());
        let _gate = f.calculator.push_gated();
        let gateway = Arc::new(f.gateway);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let gateway = gateway.clone();
            let cancel = cancel.clone();
            async move { gateway.compute_aum(&session(), None, &cancel).await }
        });
        while f.calculator.calls() == 0 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        assert_eq!(task.await.unwrap(), Err(SyncError::Cancelled));
    }
}
