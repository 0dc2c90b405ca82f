//! Shared window storage.
//!
//! The store is the only shared mutable state in the limiter. Admission is a
//! single store operation so that the expiry check, the limit comparison and
//! the increment cannot interleave with another caller's for the same key.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use super::window::{RateWindow, WindowKey};
use crate::error::Result;

/// Outcome of a store-level admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the call was counted against the window
    pub admitted: bool,
    /// The window after the operation
    pub window: RateWindow,
}

/// Storage for rate windows, shared by every caller.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically count one call against `key` if the window has room.
    ///
    /// A missing or expired window is replaced by a fresh one of length
    /// `window` before the limit is checked. A denied call leaves the stored
    /// window untouched. An admitted call refreshes the key's TTL to `window`.
    async fn try_admit(
        &self,
        key: &WindowKey,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Admission>;

    /// Read the stored window, if its TTL has not passed.
    async fn get(&self, key: &WindowKey, now: DateTime<Utc>) -> Result<Option<RateWindow>>;

    /// Delete the stored window. Deleting a missing key is not an error.
    async fn remove(&self, key: &WindowKey) -> Result<()>;
}

/// A window plus the instant its store entry expires.
#[derive(Debug, Clone, Copy)]
struct StoredWindow {
    window: RateWindow,
    expires_at: DateTime<Utc>,
}

impl StoredWindow {
    fn fresh(now: DateTime<Utc>, length: Duration) -> Self {
        Self {
            window: RateWindow::fresh(now, length),
            expires_at: now + length,
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at && !self.window.is_expired(now)
    }
}

/// In-process window store.
///
/// Each key's entry is guarded by the lock of the shard it hashes to, which
/// makes `try_admit` a single critical section per key.
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    windows: DashMap<WindowKey, StoredWindow>,
}

impl InMemoryWindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries whose TTL or window has passed. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.windows.retain(|_, stored| {
            let live = stored.is_live(now);
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Number of stored windows, including any not yet purged.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn try_admit(
        &self,
        key: &WindowKey,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        let mut entry = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| StoredWindow::fresh(now, window));

        if !entry.is_live(now) {
            *entry = StoredWindow::fresh(now, window);
        }

        if entry.window.count >= limit {
            return Ok(Admission {
                admitted: false,
                window: entry.window,
            });
        }

        entry.window.count += 1;
        entry.expires_at = now + window;

        Ok(Admission {
            admitted: true,
            window: entry.window,
        })
    }

    async fn get(&self, key: &WindowKey, now: DateTime<Utc>) -> Result<Option<RateWindow>> {
        Ok(self
            .windows
            .get(key)
            .filter(|stored| now < stored.expires_at)
            .map(|stored| stored.window))
    }

    async fn remove(&self, key: &WindowKey) -> Result<()> {
        self.windows.remove(key);
        Ok(())
    }
}
