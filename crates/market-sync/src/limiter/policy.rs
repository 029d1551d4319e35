use std::time::Duration;

/// Default window length shared by the predefined policies.
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Rate limit policy.
///
/// Policies are immutable; the same config value is passed on every
/// `check_limit` call for a given scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests admitted per window.
    pub max_requests: u32,
    /// Length of a window.
    pub window_duration: Duration,
    /// Punitive block installed when a key exceeds its quota.
    pub block_duration: Option<Duration>,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_duration: Duration) -> Self {
        Self {
            max_requests,
            window_duration,
            block_duration: None,
        }
    }

    pub fn with_block(mut self, block_duration: Duration) -> Self {
        self.block_duration = Some(block_duration);
        self
    }

    /// Price endpoint: 20 requests per minute, 5 minute block on abuse.
    pub fn prices() -> Self {
        Self::new(20, DEFAULT_WINDOW).with_block(Duration::from_secs(5 * 60))
    }

    /// AUM endpoint: 10 requests per minute.
    pub fn aum() -> Self {
        Self::new(10, DEFAULT_WINDOW)
    }

    /// Generic reads: 30 requests per minute.
    pub fn general() -> Self {
        Self::new(30, DEFAULT_WINDOW)
    }
}

/// Build a rate limit key scoped to a policy, e.g. `prices:user-1`.
pub fn scoped_key(scope: &str, subject_id: &str) -> String {
    format!("{scope}:{subject_id}")
}
