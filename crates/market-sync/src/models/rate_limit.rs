use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rate limit metadata surfaced to callers for display.
///
/// Mirrors the standard `X-RateLimit-*` response headers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    /// Requests allowed per window, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    pub remaining: u32,

    pub reset_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
}
