//! Request and payload validation.
//!
//! Requests are checked before they reach the backend:
//! - Batch size bounds
//! - Symbol length and character set (AAPL, SPY, BTC-USD, ^TNX, BRK.B)
//! - One asset type per symbol when asset types are given
//!
//! Payloads coming back are checked for obviously malformed values.

use log::warn;
use rust_decimal::Decimal;

use crate::errors::SyncError;
use crate::models::{AssetType, AumUpdate, PriceRequest, PriceSnapshot};

/// Request validator configuration.
#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Maximum symbols per request.
    pub max_symbols: usize,
    /// Minimum symbol length after trimming.
    pub min_symbol_len: usize,
    /// Maximum symbol length after trimming.
    pub max_symbol_len: usize,
    /// Prices above this are accepted but logged.
    pub max_price: Option<Decimal>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_symbols: 50,
            min_symbol_len: 1,
            max_symbol_len: 20,
            max_price: Some(Decimal::from(1_000_000_000i64)),
        }
    }
}

/// Validates price requests and collaborator payloads.
#[derive(Clone, Debug, Default)]
pub struct RequestValidator {
    config: ValidatorConfig,
}

impl RequestValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Whether `symbol` is well formed.
    pub fn is_valid_symbol(&self, symbol: &str) -> bool {
        let symbol = symbol.trim();
        let len = symbol.chars().count();
        if len < self.config.min_symbol_len || len > self.config.max_symbol_len {
            return false;
        }

        symbol
            .chars()
            .map(|c| c.to_ascii_uppercase())
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '^'))
    }

    /// Build requests from raw symbols and optional asset type hints.
    ///
    /// Symbols default to [`AssetType::Equity`].
    pub fn build_requests<S: AsRef<str>>(
        &self,
        symbols: &[S],
        asset_types: Option<&[AssetType]>,
    ) -> Result<Vec<PriceRequest>, SyncError> {
        if let Some(types) = asset_types {
            if types.len() != symbols.len() {
                return Err(SyncError::InvalidRequest(format!(
                    "expected {} asset types, got {}",
                    symbols.len(),
                    types.len()
                )));
            }
        }

        let requests: Vec<PriceRequest> = symbols
            .iter()
            .enumerate()
            .map(|(i, symbol)| {
                let asset_type = asset_types
                    .and_then(|types| types.get(i).copied())
                    .unwrap_or_default();
                PriceRequest::new(symbol, asset_type)
            })
            .collect();

        self.validate_requests(&requests)?;
        Ok(requests)
    }

    /// Check a batch of requests.
    pub fn validate_requests(&self, requests: &[PriceRequest]) -> Result<(), SyncError> {
        if requests.is_empty() {
            return Err(SyncError::InvalidRequest(
                "symbols cannot be empty".to_string(),
            ));
        }

        if requests.len() > self.config.max_symbols {
            return Err(SyncError::InvalidRequest(format!(
                "too many symbols, maximum {} per request",
                self.config.max_symbols
            )));
        }

        let invalid: Vec<&str> = requests
            .iter()
            .filter(|r| !self.is_valid_symbol(&r.symbol))
            .map(|r| r.symbol.as_str())
            .collect();
        if !invalid.is_empty() {
            return Err(SyncError::InvalidRequest(format!(
                "invalid symbol format: {}",
                invalid.join(", ")
            )));
        }

        Ok(())
    }

    /// Check a price returned by the backend.
    pub fn validate_snapshot(&self, snapshot: &PriceSnapshot) -> Result<(), SyncError> {
        if snapshot.symbol.trim().is_empty() {
            return Err(SyncError::BackendFailure(
                "price without symbol".to_string(),
            ));
        }

        if snapshot.currency.trim().is_empty() {
            return Err(SyncError::BackendFailure(format!(
                "price for {} has no currency",
                snapshot.symbol
            )));
        }

        if snapshot.price < Decimal::ZERO {
            return Err(SyncError::BackendFailure(format!(
                "negative price for {}: {}",
                snapshot.symbol, snapshot.price
            )));
        }

        if let Some(max) = self.config.max_price {
            if snapshot.price > max {
                warn!(
                    "Price for {} exceeds sanity bound: {} > {}",
                    snapshot.symbol, snapshot.price, max
                );
            }
        }

        Ok(())
    }

    /// Check an AUM returned by the calculator.
    pub fn validate_aum(&self, update: &AumUpdate) -> Result<(), SyncError> {
        if update.base_currency.trim().is_empty() {
            return Err(SyncError::BackendFailure(
                "AUM without base currency".to_string(),
            ));
        }
        Ok(())
    }
}
