//! Error types and classification for the market sync crate.
//!
//! This module provides:
//! - [`SyncError`]: The error enum shared by the gateway, the realtime channel and the controllers
//! - [`ErrorClass`]: Classification deciding whether an error is fatal, soft or silent

mod class;

pub use class::ErrorClass;

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while synchronizing market data.
///
/// Every variant is `Clone` so the latest error can be published alongside
/// the last-known value in a controller's view.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// No valid subject identity could be resolved.
    /// Terminal for the controller until the user re-authenticates.
    #[error("Not authenticated")]
    Unauthenticated,

    /// The request was rejected by the rate limiter.
    /// Retry once `retry_after` has elapsed.
    #[error("Rate limit exceeded, retry in {}s", retry_after_secs(.retry_after))]
    RateLimited {
        /// How long until a request can be admitted again
        retry_after: Duration,
        /// When the current window or block ends
        reset_at: DateTime<Utc>,
    },

    /// The push transport could not connect or dropped the connection.
    /// The controller falls back to polling only.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The request was cancelled before its result could be applied.
    #[error("Request cancelled")]
    Cancelled,

    /// A collaborator returned an error or a malformed payload.
    #[error("Backend failure: {0}")]
    BackendFailure(String),

    /// The request failed validation before being dispatched.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A channel was subscribed twice without unsubscribing first.
    #[error("Channel already subscribed: {0}")]
    AlreadySubscribed(String),
}

impl SyncError {
    /// Returns the classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use meridian_market_sync::errors::{ErrorClass, SyncError};
    ///
    /// assert_eq!(SyncError::Unauthenticated.class(), ErrorClass::Terminal);
    /// assert_eq!(SyncError::Cancelled.class(), ErrorClass::Silent);
    /// ```
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unauthenticated => ErrorClass::Terminal,

            Self::Cancelled => ErrorClass::Silent,

            Self::RateLimited { .. }
            | Self::TransportFailure(_)
            | Self::BackendFailure(_)
            | Self::InvalidRequest(_)
            | Self::AlreadySubscribed(_) => ErrorClass::Soft,
        }
    }

    /// Whether this error stops the controller.
    pub fn is_terminal(&self) -> bool {
        self.class() == ErrorClass::Terminal
    }

    /// Whole seconds to wait before retrying, rounded up.
    ///
    /// Only rate limit errors carry a hint.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(retry_after_secs(retry_after)),
            _ => None,
        }
    }
}

fn retry_after_secs(retry_after: &Duration) -> u64 {
    let millis = retry_after.as_millis() as u64;
    millis.div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited(millis: u64) -> SyncError {
        SyncError::RateLimited {
            retry_after: Duration::from_millis(millis),
            reset_at: Utc::now(),
        }
    }

    #[test]
    fn test_unauthenticated_is_terminal() {
        assert!(SyncError::Unauthenticated.is_terminal());
        assert_eq!(SyncError::Unauthenticated.class(), ErrorClass::Terminal);
    }

    #[test]
    fn test_cancelled_is_silent() {
        assert_eq!(SyncError::Cancelled.class(), ErrorClass::Silent);
        assert!(!SyncError::Cancelled.is_terminal());
    }

    #[test]
    fn test_soft_errors() {
        let errors = vec![
            rate_limited(700),
            SyncError::TransportFailure("socket closed".to_string()),
            SyncError::BackendFailure("bad payload".to_string()),
            SyncError::InvalidRequest("empty symbols".to_string()),
            SyncError::AlreadySubscribed("aum-updates-u1-all".to_string()),
        ];
        for error in errors {
            assert_eq!(error.class(), ErrorClass::Soft, "{error}");
        }
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        assert_eq!(rate_limited(700).retry_after_secs(), Some(1));
        assert_eq!(rate_limited(2050).retry_after_secs(), Some(3));
        assert_eq!(rate_limited(3000).retry_after_secs(), Some(3));
        assert_eq!(SyncError::Cancelled.retry_after_secs(), None);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", rate_limited(2050)), "Rate limit exceeded, retry in 3s");
        assert_eq!(
            format!("{}", SyncError::BackendFailure("timeout".to_string())),
            "Backend failure: timeout"
        );
        assert_eq!(format!("{}", SyncError::Unauthenticated), "Not authenticated");
    }
}
