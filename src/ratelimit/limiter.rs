//! Admission control engine.
//!
//! Every outbound platform call asks the engine first. The engine looks up the
//! platform's policy, evaluates the (platform, identifier) window in the
//! shared store and answers admit or deny. Windows are fixed: they start on the
//! first admitted call and end `window_seconds` later, after which the next
//! call starts a fresh one.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::clock::{Clock, SystemClock};
use super::policy::{PolicyTable, RateLimitPolicy};
use super::store::{InMemoryWindowStore, WindowStore};
use super::window::{RateWindow, WindowKey};
use crate::error::Result;

/// Shortest pause between attempts in `wait_until_ready`.
const MIN_BACKOFF: Duration = Duration::from_secs(1);
/// Longest pause between attempts in `wait_until_ready`.
const MAX_BACKOFF: Duration = Duration::from_secs(5);
/// Floor for a pause that ends at the window reset.
const RESET_GRACE: Duration = Duration::from_millis(10);

/// Quota usage for one (platform, identifier) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    /// Calls still available in the current window
    pub remaining: u64,
    /// The platform's call limit per window
    pub limit: u64,
    /// Calls already admitted in the current window
    pub count: u64,
    /// When the current window ends; `None` when the platform is not throttled
    /// or the window could not be read
    pub reset_at: Option<DateTime<Utc>>,
}

impl QuotaStatus {
    /// Status reported for platforms without a policy.
    pub fn unbounded() -> Self {
        Self {
            remaining: u64::MAX,
            limit: u64::MAX,
            count: 0,
            reset_at: None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.limit == u64::MAX
    }
}

/// Per-platform, per-caller rate limiter for outbound API calls.
///
/// Thread-safe; share it behind an `Arc`.
pub struct PlatformRateLimiter<S: WindowStore = InMemoryWindowStore> {
    /// Policy table, replaceable at runtime
    policies: RwLock<PolicyTable>,
    /// Shared window state
    store: Arc<S>,
    /// Wall clock used for window boundaries
    clock: Arc<dyn Clock>,
}

impl PlatformRateLimiter<InMemoryWindowStore> {
    /// Create a limiter backed by an in-process store.
    pub fn in_memory(policies: PolicyTable) -> Self {
        Self::new(policies, Arc::new(InMemoryWindowStore::new()))
    }
}

impl<S: WindowStore> PlatformRateLimiter<S> {
    /// Create a limiter over the given store using the system clock.
    pub fn new(policies: PolicyTable, store: Arc<S>) -> Self {
        Self::with_clock(policies, store, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit clock.
    pub fn with_clock(policies: PolicyTable, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policies: RwLock::new(policies),
            store,
            clock,
        }
    }

    /// Replace the policy table.
    ///
    /// Windows already in the store keep their reset instant; the new limits
    /// apply from the next call.
    pub fn set_policies(&self, policies: PolicyTable) {
        let mut current = self.policies.write();
        *current = policies;
    }

    /// Re-read a policy file and swap it in if it differs from the current table.
    ///
    /// Returns whether the table changed. A file that cannot be read or fails
    /// validation leaves the current table in place and returns the error.
    pub fn reload_from_file<P: AsRef<Path>>(&self, path: P) -> Result<bool> {
        let path = path.as_ref();
        let policies = PolicyTable::from_file(path)?;

        let mut current = self.policies.write();
        if *current == policies {
            return Ok(false);
        }

        info!(
            path = %path.display(),
            platforms = policies.len(),
            "Rate limit policies reloaded"
        );
        *current = policies;
        Ok(true)
    }

    /// A copy of the current policy table.
    pub fn policies(&self) -> PolicyTable {
        self.policies.read().clone()
    }

    /// The policy for a platform, if it is throttled.
    pub fn policy(&self, platform: &str) -> Option<RateLimitPolicy> {
        self.policies.read().get(platform).cloned()
    }

    /// Get the window store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Ask to make one call to `platform` on behalf of `identifier`.
    ///
    /// Returns `true` and counts the call when the window has room. Platforms
    /// without a policy are always admitted. If the store cannot be reached the
    /// call is denied.
    pub async fn attempt(&self, platform: &str, identifier: &str) -> bool {
        let Some(policy) = self.policy(platform) else {
            debug!(
                platform = %platform,
                identifier = %identifier,
                "No rate limit policy for platform, admitting"
            );
            return true;
        };

        let key = WindowKey::new(platform, identifier);
        let now = self.clock.now();

        match self
            .store
            .try_admit(&key, policy.call_limit, window_length(&policy), now)
            .await
        {
            Ok(admission) if admission.admitted => {
                trace!(
                    key = %key,
                    count = admission.window.count,
                    limit = policy.call_limit,
                    "Platform call admitted"
                );
                true
            }
            Ok(admission) => {
                warn!(
                    platform = %platform,
                    identifier = %identifier,
                    count = admission.window.count,
                    limit = policy.call_limit,
                    reset_at = %admission.window.reset_at,
                    "Platform rate limit exceeded"
                );
                false
            }
            Err(e) => {
                error!(
                    platform = %platform,
                    identifier = %identifier,
                    error = %e,
                    "Window store unavailable, denying platform call"
                );
                false
            }
        }
    }

    /// Report quota usage without counting a call.
    pub async fn remaining(&self, platform: &str, identifier: &str) -> QuotaStatus {
        let Some(policy) = self.policy(platform) else {
            return QuotaStatus::unbounded();
        };

        let key = WindowKey::new(platform, identifier);
        let now = self.clock.now();
        let limit = policy.call_limit;

        match self.store.get(&key, now).await {
            Ok(stored) => {
                let window = stored
                    .filter(|window| !window.is_expired(now))
                    .unwrap_or_else(|| RateWindow::fresh(now, window_length(&policy)));

                QuotaStatus {
                    remaining: window.remaining(limit),
                    limit,
                    count: window.count,
                    reset_at: Some(window.reset_at),
                }
            }
            Err(e) => {
                error!(
                    key = %key,
                    error = %e,
                    "Window store unavailable, reporting no remaining quota"
                );
                QuotaStatus {
                    remaining: 0,
                    limit,
                    count: limit,
                    reset_at: None,
                }
            }
        }
    }

    /// Suggested pause before the next attempt for a denied caller.
    ///
    /// Scales with the share of the window still to run, between one and five
    /// seconds, and never runs past the window reset.
    pub async fn retry_after(&self, platform: &str, identifier: &str) -> Duration {
        let Some(policy) = self.policy(platform) else {
            return MIN_BACKOFF;
        };
        let Some(reset_at) = self.remaining(platform, identifier).await.reset_at else {
            return MIN_BACKOFF;
        };

        let until_reset = (reset_at - self.clock.now()).to_std().unwrap_or_default();
        let fraction = (until_reset.as_secs_f64() / policy.window().as_secs_f64()).min(1.0);
        let scaled = MAX_BACKOFF.mul_f64(fraction).clamp(MIN_BACKOFF, MAX_BACKOFF);

        scaled.min(until_reset.max(RESET_GRACE))
    }

    /// Wait until a call is admitted or `max_wait` has passed.
    ///
    /// Returns `true` once a call has been admitted (and counted). Returns
    /// `false` when the deadline passes first; the caller should skip or
    /// requeue the work.
    pub async fn wait_until_ready(
        &self,
        platform: &str,
        identifier: &str,
        max_wait: Duration,
    ) -> bool {
        self.wait_until_ready_with_shutdown(
            platform,
            identifier,
            max_wait,
            std::future::pending::<()>(),
        )
        .await
    }

    /// Like [`wait_until_ready`](Self::wait_until_ready), but gives up early
    /// and returns `false` when `shutdown` resolves.
    pub async fn wait_until_ready_with_shutdown<F>(
        &self,
        platform: &str,
        identifier: &str,
        max_wait: Duration,
        shutdown: F,
    ) -> bool
    where
        F: Future<Output = ()> + Send,
    {
        let started = Instant::now();
        tokio::pin!(shutdown);

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            if self.attempt(platform, identifier).await {
                if attempts > 1 {
                    debug!(
                        platform = %platform,
                        identifier = %identifier,
                        attempts = attempts,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Platform rate limit capacity available after waiting"
                    );
                }
                return true;
            }

            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                let status = self.remaining(platform, identifier).await;
                warn!(
                    platform = %platform,
                    identifier = %identifier,
                    count = status.count,
                    limit = status.limit,
                    reset_at = ?status.reset_at,
                    waited_ms = elapsed.as_millis() as u64,
                    "Timed out waiting for platform rate limit capacity"
                );
                return false;
            }

            let delay = self
                .retry_after(platform, identifier)
                .await
                .min(max_wait - elapsed);

            tokio::select! {
                _ = &mut shutdown => {
                    info!(
                        platform = %platform,
                        identifier = %identifier,
                        "Wait for platform rate limit capacity cancelled"
                    );
                    return false;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Forget the window for a pair, restoring its full quota.
    pub async fn reset(&self, platform: &str, identifier: &str) -> Result<()> {
        let key = WindowKey::new(platform, identifier);
        self.store.remove(&key).await?;
        info!(key = %key, "Rate limit window reset");
        Ok(())
    }

    /// All configured policies keyed by platform.
    pub fn all_limits(&self) -> BTreeMap<String, RateLimitPolicy> {
        self.policies.read().to_map()
    }
}

fn window_length(policy: &RateLimitPolicy) -> chrono::Duration {
    // Policy validation bounds window_seconds well inside i64.
    chrono::Duration::seconds(policy.window_seconds as i64)
}

#[async_trait::async_trait]
impl<S: WindowStore + 'static> super::backend::RateLimiterBackend for PlatformRateLimiter<S> {
    async fn attempt(&self, platform: &str, identifier: &str) -> bool {
        self.attempt(platform, identifier).await
    }

    async fn remaining(&self, platform: &str, identifier: &str) -> QuotaStatus {
        self.remaining(platform, identifier).await
    }

    async fn wait_until_ready(&self, platform: &str, identifier: &str, max_wait: Duration) -> bool {
        self.wait_until_ready(platform, identifier, max_wait).await
    }

    async fn wait_until_ready_with_shutdown(
        &self,
        platform: &str,
        identifier: &str,
        max_wait: Duration,
        shutdown: super::backend::ShutdownSignal,
    ) -> bool {
        self.wait_until_ready_with_shutdown(platform, identifier, max_wait, shutdown)
            .await
    }

    async fn reset(&self, platform: &str, identifier: &str) -> Result<()> {
        self.reset(platform, identifier).await
    }

    fn all_limits(&self) -> BTreeMap<String, RateLimitPolicy> {
        self.all_limits()
    }
}
