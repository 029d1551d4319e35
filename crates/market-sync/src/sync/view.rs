use chrono::{DateTime, Utc};

use crate::errors::SyncError;
use crate::models::RateLimitInfo;

/// Lifecycle phase of a controller.
///
/// ```text
/// Idle -> Subscribing -> Live <-> Refreshing
///            any -> Error (recoverable)
///            any -> TornDown (terminal)
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    Subscribing,
    Live,
    Refreshing,
    Error,
    TornDown,
}

impl SyncPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TornDown)
    }
}

/// Last-known state published by a controller.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncView<T> {
    /// Last successfully applied value.
    /// Kept across soft errors.
    pub value: Option<T>,
    pub phase: SyncPhase,
    pub is_loading: bool,
    pub last_error: Option<SyncError>,
    pub rate_limit: Option<RateLimitInfo>,
    /// Whether a push subscription is delivering.
    pub channel_live: bool,
}

impl<T> Default for SyncView<T> {
    fn default() -> Self {
        Self {
            value: None,
            phase: SyncPhase::Idle,
            is_loading: false,
            last_error: None,
            rate_limit: None,
            channel_live: false,
        }
    }
}

impl<T> SyncView<T> {
    pub fn rate_limit_remaining(&self) -> Option<u32> {
        self.rate_limit.as_ref().map(|info| info.remaining)
    }

    pub fn rate_limit_reset(&self) -> Option<DateTime<Utc>> {
        self.rate_limit.as_ref().map(|info| info.reset_at)
    }
}
