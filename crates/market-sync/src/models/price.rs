use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::rate_limit::RateLimitInfo;
use super::Versioned;

/// Asset type hint passed to the pricing backend.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    #[default]
    Equity,
    Etf,
    Bond,
    MoneyMarket,
    Cash,
}

impl AssetType {
    pub const ALL: [AssetType; 5] = [
        AssetType::Equity,
        AssetType::Etf,
        AssetType::Bond,
        AssetType::MoneyMarket,
        AssetType::Cash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equity => "equity",
            Self::Etf => "etf",
            Self::Bond => "bond",
            Self::MoneyMarket => "money_market",
            Self::Cash => "cash",
        }
    }

    /// Parse the lowercase wire name.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single symbol to price.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRequest {
    pub symbol: String,
    pub asset_type: AssetType,
}

impl PriceRequest {
    pub fn new(symbol: impl AsRef<str>, asset_type: AssetType) -> Self {
        Self {
            symbol: symbol.as_ref().trim().to_uppercase(),
            asset_type,
        }
    }

    pub fn equity(symbol: impl AsRef<str>) -> Self {
        Self::new(symbol, AssetType::Equity)
    }

    /// Cache key, e.g. `AAPL_equity`.
    pub fn cache_key(&self) -> String {
        format!("{}_{}", self.symbol, self.asset_type)
    }
}

/// Price of one symbol at one instant.
///
/// Snapshots are never mutated; a newer snapshot for the same symbol
/// replaces the older one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub symbol: String,

    pub price: Decimal,

    pub currency: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_amount: Option<Decimal>,

    pub timestamp: DateTime<Utc>,

    /// Source of the price (provider name)
    pub source: String,

    /// Whether this snapshot was served from the gateway cache
    pub cached: bool,
}

impl PriceSnapshot {
    pub fn new(
        symbol: impl Into<String>,
        price: Decimal,
        currency: impl Into<String>,
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            currency: currency.into(),
            volume: None,
            change_percent: None,
            change_amount: None,
            timestamp,
            source: source.into(),
            cached: false,
        }
    }

    pub fn with_change(mut self, amount: Decimal, percent: Decimal) -> Self {
        self.change_amount = Some(amount);
        self.change_percent = Some(percent);
        self
    }

    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Copy of this snapshot flagged as served from cache.
    pub fn as_cached(&self) -> Self {
        Self {
            cached: true,
            ..self.clone()
        }
    }
}

/// A batch of prices as returned by the gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceBatch {
    pub prices: Vec<PriceSnapshot>,
    pub rate_limit: Option<RateLimitInfo>,
}

/// Latest known price per symbol, as displayed by a price controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBoard {
    pub prices: HashMap<String, PriceSnapshot>,
    pub fetched_at: DateTime<Utc>,
}

impl PriceBoard {
    pub fn from_snapshots(snapshots: Vec<PriceSnapshot>, fetched_at: DateTime<Utc>) -> Self {
        let prices = snapshots
            .into_iter()
            .map(|snapshot| (snapshot.symbol.to_uppercase(), snapshot))
            .collect();
        Self { prices, fetched_at }
    }

    pub fn get(&self, symbol: &str) -> Option<&PriceSnapshot> {
        self.prices.get(&symbol.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl Versioned for PriceBoard {
    fn last_updated(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}
