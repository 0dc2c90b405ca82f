//! Rate window state and the key it is stored under.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Identifies the window for one (platform, identifier) pair.
///
/// Rendered as `ratelimit:{platform}:{identifier}` when a store needs a flat key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// The external platform the calls go to
    pub platform: String,
    /// Caller-supplied isolation key, usually an integration id or org id
    pub identifier: String,
}

impl WindowKey {
    /// Create a new window key.
    pub fn new(platform: &str, identifier: &str) -> Self {
        Self {
            platform: platform.to_string(),
            identifier: identifier.to_string(),
        }
    }

    /// The flat key used by key-value stores.
    pub fn to_store_key(&self) -> String {
        format!("ratelimit:{}:{}", self.platform, self.identifier)
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}

/// Calls admitted in the current fixed window and when that window ends.
///
/// Serialized as `{"count": <u64>, "reset_at": <unix millis>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub count: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub reset_at: DateTime<Utc>,
}

impl RateWindow {
    /// A window with no calls that ends `length` after `now`.
    pub fn fresh(now: DateTime<Utc>, length: Duration) -> Self {
        Self {
            count: 0,
            reset_at: now + length,
        }
    }

    /// Whether the window has ended at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }

    /// Calls still available under `limit`.
    pub fn remaining(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.count)
    }
}
