//! Fixed-window rate limiter with punitive blocking.
//!
//! Each key gets a window that admits up to `max_requests` requests. A key
//! that keeps knocking after its quota is spent can be blocked outright for
//! the policy's `block_duration`, which takes precedence over the window
//! reset.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::policy::RateLimitConfig;
use crate::clock::{to_delta, until, Clock, SystemClock};
use crate::models::RateLimitInfo;

/// Default interval between cleanup sweeps: 5 minutes.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Requests admitted in the current window of one key.
#[derive(Clone, Debug)]
struct RateLimitEntry {
    count: u32,
    window_reset_at: DateTime<Utc>,
    #[allow(dead_code)]
    first_request_at: DateTime<Utc>,
}

impl RateLimitEntry {
    fn start(now: DateTime<Utc>, config: &RateLimitConfig) -> Self {
        Self {
            count: 1,
            window_reset_at: now + to_delta(config.window_duration),
            first_request_at: now,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.window_reset_at < now
    }
}

/// Punitive block of one key.
#[derive(Clone, Copy, Debug)]
struct BlockRecord {
    blocked_until: DateTime<Utc>,
}

impl BlockRecord {
    fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until > now
    }
}

/// Everything the limiter knows about one key.
///
/// The window and the block have independent lifecycles; they share a slot
/// so both are read and written under the same per-key lock.
#[derive(Debug, Default)]
struct KeyState {
    window: Option<RateLimitEntry>,
    block: Option<BlockRecord>,
}

impl KeyState {
    fn evict_expired(&mut self, now: DateTime<Utc>) {
        if self.window.as_ref().is_some_and(|w| w.is_expired(now)) {
            self.window = None;
        }
        if self.block.as_ref().is_some_and(|b| !b.is_active(now)) {
            self.block = None;
        }
    }

    fn is_empty(&self) -> bool {
        self.window.is_none() && self.block.is_none()
    }
}

/// Outcome of [`RateLimiter::check_limit`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    fn admitted(remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at,
            retry_after: None,
        }
    }

    fn rejected(now: DateTime<Utc>, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            retry_after: Some(until(now, reset_at)),
        }
    }

    /// Metadata for display, tagged with the policy's limit.
    pub fn info(&self, config: &RateLimitConfig) -> RateLimitInfo {
        RateLimitInfo {
            limit: Some(config.max_requests),
            remaining: self.remaining,
            reset_at: self.reset_at,
            retry_after: self.retry_after,
        }
    }
}

/// Outcome of [`RateLimiter::get_status`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub is_blocked: bool,
    pub retry_after: Option<Duration>,
}

/// Monitoring counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    /// Window entries currently held, expired or not.
    pub active_limits: usize,
    /// Blocks still in force.
    pub blocked_keys: usize,
}

/// Key-scoped rate limiter shared by every controller in the process.
///
/// The key space lives in a sharded concurrent map. A key's window and block
/// are only ever touched while holding that key's shard lock, so concurrent
/// callers on the same key observe linearizable counter updates.
pub struct RateLimiter {
    keys: DashMap<String, KeyState>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a rate limiter reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            keys: DashMap::new(),
            clock,
        }
    }

    /// Admit or reject one request for `key` under `config`.
    ///
    /// Never fails: rejection is a regular outcome.
    pub fn check_limit(&self, key: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now = self.clock.now();
        let mut guard = self.keys.entry(key.to_string()).or_default();
        let state = &mut *guard;

        if let Some(block) = state.block {
            if block.is_active(now) {
                debug!("Rate limiter: '{}' blocked until {}", key, block.blocked_until);
                return RateLimitDecision::rejected(now, block.blocked_until);
            }
            state.block = None;
        }

        match state.window.as_mut() {
            Some(entry) if !entry.is_expired(now) => {
                if entry.count >= config.max_requests {
                    if let Some(block_duration) = config.block_duration {
                        let blocked_until = now + to_delta(block_duration);
                        state.block = Some(BlockRecord { blocked_until });
                        warn!(
                            "Rate limiter: '{}' exceeded {} requests, blocked until {}",
                            key, config.max_requests, blocked_until
                        );
                        return RateLimitDecision::rejected(now, blocked_until);
                    }

                    debug!("Rate limiter: '{}' exhausted its window", key);
                    return RateLimitDecision::rejected(now, entry.window_reset_at);
                }

                entry.count += 1;
                RateLimitDecision::admitted(
                    config.max_requests.saturating_sub(entry.count),
                    entry.window_reset_at,
                )
            }
            _ => {
                let entry = RateLimitEntry::start(now, config);
                let reset_at = entry.window_reset_at;
                state.window = Some(entry);
                RateLimitDecision::admitted(config.max_requests.saturating_sub(1), reset_at)
            }
        }
    }

    /// Current quota for `key` without consuming a slot.
    pub fn get_status(&self, key: &str, config: &RateLimitConfig) -> RateLimitStatus {
        let now = self.clock.now();
        let fresh = RateLimitStatus {
            remaining: config.max_requests,
            reset_at: now + to_delta(config.window_duration),
            is_blocked: false,
            retry_after: None,
        };

        let Some(state) = self.keys.get(key) else {
            return fresh;
        };

        if let Some(block) = state.block.filter(|b| b.is_active(now)) {
            return RateLimitStatus {
                remaining: 0,
                reset_at: block.blocked_until,
                is_blocked: true,
                retry_after: Some(until(now, block.blocked_until)),
            };
        }

        match &state.window {
            Some(entry) if !entry.is_expired(now) => RateLimitStatus {
                remaining: config.max_requests.saturating_sub(entry.count),
                reset_at: entry.window_reset_at,
                is_blocked: false,
                retry_after: None,
            },
            _ => fresh,
        }
    }

    /// Forget everything about `key`, including any block.
    pub fn reset(&self, key: &str) {
        self.keys.remove(key);
    }

    /// Drop expired windows and lapsed blocks.
    ///
    /// Expiry is evaluated per key while holding its shard lock, so a window
    /// created concurrently with the sweep is never removed. Returns the
    /// number of keys dropped.
    pub fn cleanup(&self) -> usize {
        let before = self.keys.len();
        self.keys.retain(|_, state| {
            state.evict_expired(self.clock.now());
            !state.is_empty()
        });
        before.saturating_sub(self.keys.len())
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = self.clock.now();
        self.keys
            .iter()
            .fold(RateLimiterStats::default(), |mut stats, state| {
                if state.window.is_some() {
                    stats.active_limits += 1;
                }
                if state.block.is_some_and(|b| b.is_active(now)) {
                    stats.blocked_keys += 1;
                }
                stats
            })
    }

    /// Run [`cleanup`](Self::cleanup) every `every` on a background task.
    ///
    /// The task holds a weak reference and exits once the limiter is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let every = if every.is_zero() {
            DEFAULT_CLEANUP_INTERVAL
        } else {
            every
        };
        let limiter = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    debug!("Rate limiter dropped, stopping cleanup");
                    break;
                };
                let removed = limiter.cleanup();
                if removed > 0 {
                    debug!("Rate limiter cleanup removed {} key(s)", removed);
                }
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
