//! Runtime configuration.
//!
//! Every knob has a default. `SyncConfig::from_env` overrides them from
//! `AUM_SYNC_*` environment variables; unparsable values are logged and
//! ignored.

use std::str::FromStr;
use std::time::Duration;

use log::warn;

use crate::channel::DEFAULT_TOPIC_CAPACITY;
use crate::limiter::{RateLimitConfig, DEFAULT_CLEANUP_INTERVAL};
use crate::provider::DEFAULT_PRICE_CACHE_TTL;

/// Default fallback refresh interval: 30 seconds.
pub const DEFAULT_FALLBACK_INTERVAL: Duration = Duration::from_secs(30);

pub const ENV_FALLBACK_INTERVAL_MS: &str = "AUM_SYNC_FALLBACK_INTERVAL_MS";
pub const ENV_CLEANUP_INTERVAL_SECS: &str = "AUM_SYNC_CLEANUP_INTERVAL_SECS";
pub const ENV_PRICE_CACHE_TTL_SECS: &str = "AUM_SYNC_PRICE_CACHE_TTL_SECS";
pub const ENV_PRICES_MAX_REQUESTS: &str = "AUM_SYNC_PRICES_MAX_REQUESTS";
pub const ENV_AUM_MAX_REQUESTS: &str = "AUM_SYNC_AUM_MAX_REQUESTS";
pub const ENV_CHANNEL_CAPACITY: &str = "AUM_SYNC_CHANNEL_CAPACITY";

/// Settings shared by the gateway, the limiter and the controllers.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    /// Interval of the staleness backstop. `None` disables the timer.
    pub fallback_interval: Option<Duration>,
    /// Interval between rate limiter cleanup sweeps.
    pub cleanup_interval: Duration,
    /// Lifetime of cached prices. Zero disables the cache.
    pub price_cache_ttl: Duration,
    /// Policy applied to price fetches, keyed `prices:<subject>`.
    pub prices_policy: RateLimitConfig,
    /// Policy applied to AUM fetches, keyed `aum:<subject>`.
    pub aum_policy: RateLimitConfig,
    /// Per-topic buffer of the in-memory push transport.
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fallback_interval: Some(DEFAULT_FALLBACK_INTERVAL),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            price_cache_ttl: DEFAULT_PRICE_CACHE_TTL,
            prices_policy: RateLimitConfig::prices(),
            aum_policy: RateLimitConfig::aum(),
            channel_capacity: DEFAULT_TOPIC_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, ENV_FALLBACK_INTERVAL_MS) {
            config.fallback_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_CLEANUP_INTERVAL_SECS) {
            config.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_PRICE_CACHE_TTL_SECS) {
            config.price_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(max) = parse::<u32>(&lookup, ENV_PRICES_MAX_REQUESTS) {
            config.prices_policy.max_requests = max;
        }
        if let Some(max) = parse::<u32>(&lookup, ENV_AUM_MAX_REQUESTS) {
            config.aum_policy.max_requests = max;
        }
        if let Some(capacity) = parse::<usize>(&lookup, ENV_CHANNEL_CAPACITY) {
            config.channel_capacity = capacity.max(1);
        }

        config
    }

    pub fn with_fallback_interval(mut self, interval: Option<Duration>) -> Self {
        self.fallback_interval = interval;
        self
    }

    pub fn with_price_cache_ttl(mut self, ttl: Duration) -> Self {
        self.price_cache_ttl = ttl;
        self
    }

    pub fn with_prices_policy(mut self, policy: RateLimitConfig) -> Self {
        self.prices_policy = policy;
        self
    }

    pub fn with_aum_policy(mut self, policy: RateLimitConfig) -> Self {
        self.aum_policy = policy;
        self
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", name, raw);
            None
        }
    }
}
