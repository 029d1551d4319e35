//! Scripted collaborators for tests and local development.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::traits::{AumCalculator, BackendPrices, PricingBackend};
use crate::errors::SyncError;
use crate::models::{AumUpdate, PriceRequest, PriceSnapshot, RateLimitInfo};

/// Pricing backend answering from a fixed price table.
///
/// Symbols missing from the table are left out of the response.
#[derive(Clone, Default)]
pub struct MockPricingBackend {
    prices: Arc<Mutex<HashMap<String, PriceSnapshot>>>,
    rate_limit: Arc<Mutex<Option<RateLimitInfo>>>,
    failure: Arc<Mutex<Option<SyncError>>>,
    batches: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockPricingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, snapshot: PriceSnapshot) {
        self.prices
            .lock()
            .unwrap()
            .insert(snapshot.symbol.to_uppercase(), snapshot);
    }

    /// Metadata attached to every response.
    pub fn set_rate_limit(&self, info: Option<RateLimitInfo>) {
        *self.rate_limit.lock().unwrap() = info;
    }

    /// Fail every call with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<SyncError>) {
        *self.failure.lock().unwrap() = error;
    }

    /// Symbols of each call, in call order.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl PricingBackend for MockPricingBackend {
    fn id(&self) -> &'static str {
        "MOCK"
    }

    async fn fetch_prices(
        &self,
        requests: &[PriceRequest],
        _credential: &str,
    ) -> Result<BackendPrices, SyncError> {
        self.batches
            .lock()
            .unwrap()
            .push(requests.iter().map(|r| r.symbol.clone()).collect());

        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        let table = self.prices.lock().unwrap();
        Ok(BackendPrices {
            prices: requests
                .iter()
                .filter_map(|r| table.get(&r.symbol).cloned())
                .collect(),
            rate_limit: self.rate_limit.lock().unwrap().clone(),
        })
    }
}

enum Scripted {
    Ready(Result<AumUpdate, SyncError>),
    Gated(oneshot::Receiver<Result<AumUpdate, SyncError>>),
}

/// AUM calculator replaying scripted answers in call order.
///
/// Once the script is exhausted every call gets the default answer.
#[derive(Clone)]
pub struct MockAumCalculator {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    default: Arc<Mutex<Result<AumUpdate, SyncError>>>,
    calls: Arc<AtomicUsize>,
}

impl MockAumCalculator {
    pub fn returning(update: AumUpdate) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            default: Arc::new(Mutex::new(Ok(update))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_default(&self, result: Result<AumUpdate, SyncError>) {
        *self.default.lock().unwrap() = result;
    }

    /// Answer the next unscripted call with `result`.
    pub fn push_ready(&self, result: Result<AumUpdate, SyncError>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Ready(result));
    }

    /// Hold the next unscripted call until the returned sender fires.
    pub fn push_gated(&self) -> oneshot::Sender<Result<AumUpdate, SyncError>> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().unwrap().push_back(Scripted::Gated(rx));
        tx
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AumCalculator for MockAumCalculator {
    async fn compute_aum(
        &self,
        _subject_id: &str,
        _portfolio_id: Option<&str>,
    ) -> Result<AumUpdate, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Ready(result)) => result,
            Some(Scripted::Gated(rx)) => rx.await.unwrap_or(Err(SyncError::Cancelled)),
            None => self.default.lock().unwrap().clone(),
        }
    }
}
