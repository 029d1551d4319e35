use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::clock::{to_delta, Clock};
use crate::models::{PriceRequest, PriceSnapshot};

/// Default lifetime of a cached price: 30 seconds.
pub const DEFAULT_PRICE_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
struct CachedPrice {
    snapshot: PriceSnapshot,
    expires_at: DateTime<Utc>,
}

/// Short-lived price cache keyed by symbol and asset type.
pub struct PriceCache {
    entries: DashMap<String, CachedPrice>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl PriceCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached snapshot for `request`, flagged `cached`.
    pub fn get(&self, request: &PriceRequest) -> Option<PriceSnapshot> {
        if self.ttl.is_zero() {
            return None;
        }
        let now = self.clock.now();
        self.entries
            .get(&request.cache_key())
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.snapshot.as_cached())
    }

    pub fn put(&self, request: &PriceRequest, snapshot: &PriceSnapshot) {
        if self.ttl.is_zero() {
            return;
        }
        let expires_at = self.clock.now() + to_delta(self.ttl);
        self.entries.insert(
            request.cache_key(),
            CachedPrice {
                snapshot: snapshot.clone(),
                expires_at,
            },
        );
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
