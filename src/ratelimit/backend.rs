//! Rate limiter trait the RPC layer is written against.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::limiter::QuotaStatus;
use super::policy::RateLimitPolicy;
use crate::error::Result;

/// Future that resolves when a pending wait should be abandoned.
pub type ShutdownSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Trait for admission control implementations.
///
/// The gRPC service is generic over this so it can be driven by a
/// `PlatformRateLimiter` over any window store.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Count one call if the platform's window has room.
    async fn attempt(&self, platform: &str, identifier: &str) -> bool;

    /// Report quota usage without counting a call.
    async fn remaining(&self, platform: &str, identifier: &str) -> QuotaStatus;

    /// Wait up to `max_wait` for a call to be admitted.
    async fn wait_until_ready(&self, platform: &str, identifier: &str, max_wait: Duration) -> bool;

    /// Like `wait_until_ready`, returning `false` as soon as `shutdown` resolves.
    async fn wait_until_ready_with_shutdown(
        &self,
        platform: &str,
        identifier: &str,
        max_wait: Duration,
        shutdown: ShutdownSignal,
    ) -> bool;

    /// Drop the window for a pair.
    async fn reset(&self, platform: &str, identifier: &str) -> Result<()>;

    /// All configured policies keyed by platform.
    fn all_limits(&self) -> BTreeMap<String, RateLimitPolicy>;
}
