//! End-to-end checks across the limiter, gateway, channel and controllers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meridian_market_sync::provider::{MockAumCalculator, MockPricingBackend};
use meridian_market_sync::{
    aum_topic, AumSource, AumSync, AumUpdate, BroadcastTransport, Clock, ManualClock, PriceRequest,
    PriceSnapshot, PriceSource, PriceSync, PricingGateway, PushMessage, RateLimitConfig,
    RateLimiter, StaticSessionProvider, SyncConfig, SyncController, SyncError, SyncPhase, SyncView,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn aum(total: Decimal, secs: i64) -> AumUpdate {
    let mut update = AumUpdate::empty(
        "USD",
        DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(secs),
    );
    update.total_aum = total;
    update.total_aum_base_currency = total;
    update
}

struct Pipeline {
    clock: Arc<ManualClock>,
    backend: MockPricingBackend,
    calculator: MockAumCalculator,
    transport: BroadcastTransport,
    gateway: Arc<PricingGateway>,
    sessions: Arc<StaticSessionProvider>,
    config: SyncConfig,
}

impl Pipeline {
    fn new(config: SyncConfig) -> Self {
        let clock = Arc::new(ManualClock::at_epoch());
        let backend = MockPricingBackend::new();
        let calculator = MockAumCalculator::returning(aum(dec!(1_250_000), 100));
        let limiter = Arc::new(RateLimiter::with_clock(clock.clone()));
        limiter.spawn_cleanup(config.cleanup_interval);
        let gateway = PricingGateway::from_config(
            limiter,
            Arc::new(backend.clone()),
            Arc::new(calculator.clone()),
            &config,
        )
        .with_clock(clock.clone());

        Self {
            clock,
            backend,
            calculator,
            transport: BroadcastTransport::from_config(&config),
            gateway: Arc::new(gateway),
            sessions: Arc::new(StaticSessionProvider::signed_in("client-7", "token")),
            config,
        }
    }

    fn aum_sync(&self) -> AumSync {
        let source =
            AumSource::new(self.gateway.clone()).with_transport(Arc::new(self.transport.clone()));
        SyncController::spawn(source, self.sessions.clone(), &self.config)
    }

    fn price_sync(&self, symbols: &[&str]) -> PriceSync {
        let source = PriceSource::from_symbols(self.gateway.clone(), symbols, None)
            .unwrap()
            .with_clock(self.clock.clone());
        SyncController::spawn(source, self.sessions.clone(), &self.config)
    }
}

async fn wait_until<S: meridian_market_sync::sync::SyncSource>(
    controller: &SyncController<S>,
    mut condition: impl FnMut(&SyncView<S::Value>) -> bool,
) -> SyncView<S::Value> {
    let mut view = controller.watch();
    let reached = tokio::time::timeout(Duration::from_secs(5), view.wait_for(|v| condition(v)))
        .await
        .expect("condition not reached")
        .expect("controller stopped")
        .clone();
    reached
}

#[tokio::test(start_paused = true)]
async fn rejected_fallback_keeps_displayed_aum() {
    let pipeline = Pipeline::new(
        SyncConfig::default()
            .with_fallback_interval(Some(Duration::from_secs(30)))
            .with_aum_policy(RateLimitConfig::new(1, Duration::from_secs(60))),
    );
    let controller = pipeline.aum_sync();
    let live = wait_until(&controller, |v| v.phase == SyncPhase::Live && v.channel_live).await;
    assert_eq!(live.value.as_ref().map(|u| u.total_aum), Some(dec!(1_250_000)));

    // Window still open on the limiter's clock; the timer's fetch is rejected.
    tokio::time::sleep(Duration::from_secs(31)).await;

    let view = controller.view();
    assert_eq!(view.value, live.value);
    assert!(matches!(view.last_error, Some(SyncError::RateLimited { .. })));
    assert_eq!(view.last_error.as_ref().and_then(|e| e.retry_after_secs()), Some(60));
    assert!(!view.is_loading);
    assert!(view.channel_live);
    assert_eq!(view.rate_limit.as_ref().map(|r| r.remaining), Some(0));
    assert_eq!(pipeline.calculator.calls(), 1);

    // Pushes keep flowing while fetches are throttled.
    pipeline.transport.publish(
        &aum_topic("client-7", None),
        PushMessage::Aum {
            update: aum(dec!(1_260_000), 200),
        },
    );
    let pushed = wait_until(&controller, |v| {
        v.value.as_ref().is_some_and(|u| u.total_aum == dec!(1_260_000))
    })
    .await;

    // A successful push clears the soft error.
    assert_eq!(pushed.phase, SyncPhase::Live);
    assert!(pushed.last_error.is_none());
    assert!(!pushed.is_loading);
}

#[tokio::test(start_paused = true)]
async fn controllers_of_one_subject_share_the_quota() {
    let pipeline = Pipeline::new(
        SyncConfig::default()
            .with_fallback_interval(None)
            .with_aum_policy(RateLimitConfig::new(3, Duration::from_secs(60))),
    );
    let first = pipeline.aum_sync();
    let second = pipeline.aum_sync();
    wait_until(&first, |v| v.phase == SyncPhase::Live).await;
    wait_until(&second, |v| v.phase == SyncPhase::Live).await;

    first.refresh().await.unwrap();
    let err = second.refresh().await.unwrap_err();

    assert!(matches!(err, SyncError::RateLimited { .. }));
    assert_eq!(pipeline.calculator.calls(), 3);

    pipeline.clock.advance(Duration::from_secs(61));
    second.refresh().await.unwrap();
    assert_eq!(second.phase(), SyncPhase::Live);
}

#[tokio::test(start_paused = true)]
async fn price_sync_exposes_quota_and_serves_cache() {
    let pipeline = Pipeline::new(SyncConfig::default().with_fallback_interval(None));
    for (symbol, price) in [("AAPL", dec!(190.25)), ("VOO", dec!(470.80))] {
        pipeline
            .backend
            .set_price(PriceSnapshot::new(symbol, price, "USD", pipeline.clock.now(), "MOCK"));
    }

    let controller = pipeline.price_sync(&["aapl", "voo"]);
    let view = wait_until(&controller, |v| v.phase == SyncPhase::Live).await;

    let board = view.value.unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board.get("AAPL").map(|p| p.price), Some(dec!(190.25)));
    assert_eq!(controller.rate_limit_remaining(), Some(19));
    assert_eq!(
        controller.rate_limit_reset(),
        Some(pipeline.clock.now() + chrono::Duration::seconds(60))
    );

    controller.refresh().await.unwrap();
    let board = controller.current_value().unwrap();
    assert!(board.get("VOO").is_some_and(|p| p.cached));
    assert_eq!(pipeline.backend.calls(), 1);
    assert_eq!(controller.rate_limit_remaining(), Some(18));
}

#[tokio::test(start_paused = true)]
async fn price_sync_is_blocked_after_exhausting_quota() {
    let pipeline = Pipeline::new(
        SyncConfig::default()
            .with_fallback_interval(None)
            .with_prices_policy(
                RateLimitConfig::new(2, Duration::from_secs(60))
                    .with_block(Duration::from_secs(300)),
            ),
    );
    pipeline.backend.set_price(PriceSnapshot::new(
        "AAPL",
        dec!(190.25),
        "USD",
        pipeline.clock.now(),
        "MOCK",
    ));

    let controller = pipeline.price_sync(&["AAPL"]);
    wait_until(&controller, |v| v.phase == SyncPhase::Live).await;
    controller.refresh().await.unwrap();

    let err = controller.refresh().await.unwrap_err();
    assert_eq!(err.retry_after_secs(), Some(300));

    // The block outlives the window.
    pipeline.clock.advance(Duration::from_secs(120));
    let err = controller.refresh().await.unwrap_err();
    assert_eq!(err.retry_after_secs(), Some(180));
    assert!(controller.current_value().is_some());

    pipeline.clock.advance(Duration::from_secs(180));
    controller.refresh().await.unwrap();
    assert_eq!(controller.rate_limit_remaining(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn invalid_symbols_are_rejected_up_front() {
    let pipeline = Pipeline::new(SyncConfig::default());
    let err = PriceSource::from_symbols(pipeline.gateway.clone(), &["AAPL", "DROP TABLE"], None)
        .err()
        .unwrap();
    assert!(matches!(err, SyncError::InvalidRequest(_)));

    let requests = vec![PriceRequest::equity("AAPL")];
    assert_eq!(
        PriceSource::new(pipeline.gateway.clone(), requests.clone()).requests(),
        &requests[..]
    );
}

#[tokio::test(start_paused = true)]
async fn sign_out_then_refresh_requires_a_session() {
    let pipeline = Pipeline::new(SyncConfig::default().with_fallback_interval(None));
    let controller = pipeline.aum_sync();
    wait_until(&controller, |v| v.phase == SyncPhase::Live).await;

    pipeline.sessions.sign_out();
    controller.teardown().await;
    assert_eq!(controller.phase(), SyncPhase::TornDown);

    // Subject change: a fresh controller for the new state.
    let replacement = pipeline.aum_sync();
    let view = wait_until(&replacement, |v| v.phase == SyncPhase::Error).await;
    assert_eq!(view.last_error, Some(SyncError::Unauthenticated));
    assert!(view.value.is_none());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        pipeline.transport.connection_count(&aum_topic("client-7", None)),
        0
    );
}
