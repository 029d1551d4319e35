//! What a controller keeps fresh.
//!
//! A [`SyncSource`] knows how to fetch one value through the gateway and,
//! optionally, how to open a push subscription for it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::channel::{PushTransport, RealtimeChannel, SubscriptionHandle, UpdateSink};
use crate::clock::{Clock, SystemClock};
use crate::errors::SyncError;
use crate::models::{
    AssetType, AumUpdate, PriceBoard, PriceRequest, RateLimitInfo, Session, Versioned,
};
use crate::provider::PricingGateway;

/// A fetched value with the rate limit metadata that came with it.
#[derive(Clone, Debug, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub rate_limit: Option<RateLimitInfo>,
}

#[async_trait]
pub trait SyncSource: Send + Sync + 'static {
    type Value: Versioned + Clone + Send + Sync + 'static;

    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Fetch the current value for `session`.
    ///
    /// Implementations should give up with [`SyncError::Cancelled`] once
    /// `cancel` fires.
    async fn fetch(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Self::Value>, SyncError>;

    /// Open a push subscription delivering to `sink`.
    ///
    /// `None` means the source has no push path and relies on fetches alone.
    async fn open_channel(
        &self,
        _session: &Session,
        _sink: Arc<dyn UpdateSink<Self::Value>>,
    ) -> Option<Result<SubscriptionHandle, SyncError>> {
        None
    }
}

/// AUM of one subject, optionally narrowed to one portfolio.
///
/// Pushes arrive through a [`RealtimeChannel`] when a transport is set.
pub struct AumSource {
    gateway: Arc<PricingGateway>,
    transport: Option<Arc<dyn PushTransport>>,
    portfolio_id: Option<String>,
}

impl AumSource {
    pub fn new(gateway: Arc<PricingGateway>) -> Self {
        Self {
            gateway,
            transport: None,
            portfolio_id: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn for_portfolio(mut self, portfolio_id: impl Into<String>) -> Self {
        self.portfolio_id = Some(portfolio_id.into());
        self
    }
}

#[async_trait]
impl SyncSource for AumSource {
    type Value = AumUpdate;

    fn name(&self) -> &'static str {
        "aum"
    }

    async fn fetch(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<Fetched<AumUpdate>, SyncError> {
        let value = self
            .gateway
            .compute_aum(session, self.portfolio_id.as_deref(), cancel)
            .await?;
        Ok(Fetched {
            value,
            rate_limit: None,
        })
    }

    async fn open_channel(
        &self,
        session: &Session,
        sink: Arc<dyn UpdateSink<AumUpdate>>,
    ) -> Option<Result<SubscriptionHandle, SyncError>> {
        let transport = self.transport.clone()?;
        let channel = RealtimeChannel::new(
            session.clone(),
            self.portfolio_id.clone(),
            self.gateway.clone(),
            transport,
        );
        Some(channel.subscribe(sink).await)
    }
}

/// Latest prices of a fixed set of symbols.
pub struct PriceSource {
    gateway: Arc<PricingGateway>,
    requests: Vec<PriceRequest>,
    clock: Arc<dyn Clock>,
}

impl PriceSource {
    pub fn new(gateway: Arc<PricingGateway>, requests: Vec<PriceRequest>) -> Self {
        Self {
            gateway,
            requests,
            clock: Arc::new(SystemClock),
        }
    }

    /// Build from raw symbols, validated with the gateway's rules.
    pub fn from_symbols<S: AsRef<str>>(
        gateway: Arc<PricingGateway>,
        symbols: &[S],
        asset_types: Option<&[AssetType]>,
    ) -> Result<Self, SyncError> {
        let requests = gateway.validator().build_requests(symbols, asset_types)?;
        Ok(Self::new(gateway, requests))
    }

    /// Stamp boards with `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn requests(&self) -> &[PriceRequest] {
        &self.requests
    }
}

#[async_trait]
impl SyncSource for PriceSource {
    type Value = PriceBoard;

    fn name(&self) -> &'static str {
        "prices"
    }

    async fn fetch(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<Fetched<PriceBoard>, SyncError> {
        let batch = self
            .gateway
            .fetch_prices(session, &self.requests, cancel)
            .await?;
        Ok(Fetched {
            value: PriceBoard::from_snapshots(batch.prices, self.clock.now()),
            rate_limit: batch.rate_limit,
        })
    }
}
