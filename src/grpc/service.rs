//! Platform rate limit service implementation.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tonic::{Request, Response, Status};
use tracing::{debug, error, instrument, warn};

use super::proto::platform_rate_limit_service_server::PlatformRateLimitService;
use super::proto::{
    AttemptRequest, AttemptResponse, GetAllLimitsRequest, GetAllLimitsResponse, Policy,
    RemainingRequest, RemainingResponse, ResetRequest, ResetResponse, WaitUntilReadyRequest,
    WaitUntilReadyResponse,
};
use crate::ratelimit::{RateLimiterBackend, ShutdownSignal};

/// Implementation of the `PlatformRateLimitService` gRPC interface.
pub struct RateLimitServiceImpl<R: RateLimiterBackend> {
    /// The rate limiter instance
    rate_limiter: Arc<R>,
    /// Wait budget used when a request does not set one
    default_max_wait: Duration,
    /// Largest wait budget a request may ask for
    max_wait_cap: Duration,
    /// Flips to `true` when the server starts shutting down
    shutdown: watch::Receiver<bool>,
}

impl<R: RateLimiterBackend> RateLimitServiceImpl<R> {
    /// Create a new RateLimitServiceImpl with the given rate limiter.
    ///
    /// Pending waits are only released by their deadline until a shutdown
    /// receiver is attached with [`with_shutdown`](Self::with_shutdown).
    pub fn new(rate_limiter: Arc<R>, default_max_wait: Duration, max_wait_cap: Duration) -> Self {
        let (_never, shutdown) = watch::channel(false);
        Self {
            rate_limiter,
            default_max_wait: default_max_wait.min(max_wait_cap),
            max_wait_cap,
            shutdown,
        }
    }

    /// Abandon pending `WaitUntilReady` calls once `shutdown` reads `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn shutdown_signal(&self) -> ShutdownSignal {
        let mut shutdown = self.shutdown.clone();
        Box::pin(async move {
            // A dropped sender means nobody can ask for shutdown any more.
            if shutdown.wait_for(|stopping| *stopping).await.is_err() {
                std::future::pending::<()>().await;
            }
        })
    }
}

fn validate_caller(platform: &str, identifier: &str) -> Result<(), Status> {
    if platform.is_empty() {
        warn!("Received rate limit request with empty platform");
        return Err(Status::invalid_argument("platform is required"));
    }
    if identifier.is_empty() {
        warn!(platform = %platform, "Received rate limit request with empty identifier");
        return Err(Status::invalid_argument("identifier is required"));
    }
    Ok(())
}

fn to_timestamp(at: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos() as i32,
    }
}

fn to_proto_duration(duration: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: duration.as_secs() as i64,
        nanos: duration.subsec_nanos() as i32,
    }
}

#[tonic::async_trait]
impl<R: RateLimiterBackend + 'static> PlatformRateLimitService for RateLimitServiceImpl<R> {
    #[instrument(
        skip(self, request),
        fields(
            platform = %request.get_ref().platform,
            identifier = %request.get_ref().identifier
        )
    )]
    async fn attempt(
        &self,
        request: Request<AttemptRequest>,
    ) -> Result<Response<AttemptResponse>, Status> {
        let req = request.into_inner();
        validate_caller(&req.platform, &req.identifier)?;

        let admitted = self.rate_limiter.attempt(&req.platform, &req.identifier).await;
        debug!(admitted = admitted, "Admission decision made");

        Ok(Response::new(AttemptResponse { admitted }))
    }

    async fn remaining(
        &self,
        request: Request<RemainingRequest>,
    ) -> Result<Response<RemainingResponse>, Status> {
        let req = request.into_inner();
        validate_caller(&req.platform, &req.identifier)?;

        let status = self
            .rate_limiter
            .remaining(&req.platform, &req.identifier)
            .await;

        Ok(Response::new(RemainingResponse {
            remaining: status.remaining,
            limit: status.limit,
            count: status.count,
            reset_at: status.reset_at.map(to_timestamp),
            unbounded: status.is_unbounded(),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(
            platform = %request.get_ref().platform,
            identifier = %request.get_ref().identifier
        )
    )]
    async fn wait_until_ready(
        &self,
        request: Request<WaitUntilReadyRequest>,
    ) -> Result<Response<WaitUntilReadyResponse>, Status> {
        let req = request.into_inner();
        validate_caller(&req.platform, &req.identifier)?;

        let max_wait = match req.max_wait {
            Some(max_wait) => Duration::try_from(max_wait)
                .map_err(|_| Status::invalid_argument("max_wait must be a non-negative duration"))?,
            None => self.default_max_wait,
        };
        if max_wait > self.max_wait_cap {
            warn!(
                requested_ms = max_wait.as_millis() as u64,
                cap_ms = self.max_wait_cap.as_millis() as u64,
                "Rejected wait budget above the configured cap"
            );
            return Err(Status::invalid_argument(format!(
                "max_wait must not exceed {}s",
                self.max_wait_cap.as_secs()
            )));
        }

        let started = std::time::Instant::now();
        let admitted = self
            .rate_limiter
            .wait_until_ready_with_shutdown(
                &req.platform,
                &req.identifier,
                max_wait,
                self.shutdown_signal(),
            )
            .await;

        Ok(Response::new(WaitUntilReadyResponse {
            admitted,
            waited: Some(to_proto_duration(started.elapsed())),
        }))
    }

    async fn reset(
        &self,
        request: Request<ResetRequest>,
    ) -> Result<Response<ResetResponse>, Status> {
        let req = request.into_inner();
        validate_caller(&req.platform, &req.identifier)?;

        self.rate_limiter
            .reset(&req.platform, &req.identifier)
            .await
            .map_err(|e| {
                error!(
                    platform = %req.platform,
                    identifier = %req.identifier,
                    error = %e,
                    "Failed to reset rate limit window"
                );
                Status::unavailable(e.to_string())
            })?;

        Ok(Response::new(ResetResponse {}))
    }

    async fn get_all_limits(
        &self,
        _request: Request<GetAllLimitsRequest>,
    ) -> Result<Response<GetAllLimitsResponse>, Status> {
        let policies = self
            .rate_limiter
            .all_limits()
            .into_values()
            .map(|policy| Policy {
                platform: policy.platform,
                call_limit: policy.call_limit,
                window_seconds: policy.window_seconds,
                burst_allowance: policy.burst_allowance,
            })
            .collect();

        Ok(Response::new(GetAllLimitsResponse { policies }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{PlatformRateLimiter, PolicyTable, RateLimitPolicy};

    fn service(policies: PolicyTable) -> RateLimitServiceImpl<PlatformRateLimiter> {
        let rate_limiter = Arc::new(PlatformRateLimiter::in_memory(policies));
        RateLimitServiceImpl::new(rate_limiter, Duration::from_secs(1), Duration::from_secs(10))
    }

    fn wait_request(max_wait: Option<Duration>) -> Request<WaitUntilReadyRequest> {
        Request::new(WaitUntilReadyRequest {
            platform: "meta".to_string(),
            identifier: "org-1".to_string(),
            max_wait: max_wait.map(to_proto_duration),
        })
    }

    fn meta_three_per_minute() -> PolicyTable {
        PolicyTable::from_policies([RateLimitPolicy::new("meta", 3, 60, 0)]).unwrap()
    }

    fn attempt_request(platform: &str, identifier: &str) -> Request<AttemptRequest> {
        Request::new(AttemptRequest {
            platform: platform.to_string(),
            identifier: identifier.to_string(),
        })
    }

    #[tokio::test]
    async fn test_empty_platform_rejected() {
        let service = service(PolicyTable::defaults());

        let result = service.attempt(attempt_request("", "org-1")).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_empty_identifier_rejected() {
        let service = service(PolicyTable::defaults());

        let result = service
            .remaining(Request::new(RemainingRequest {
                platform: "meta".to_string(),
                identifier: String::new(),
            }))
            .await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_attempt_until_denied() {
        let service = service(meta_three_per_minute());

        for _ in 0..3 {
            let response = service.attempt(attempt_request("meta", "org-1")).await.unwrap();
            assert!(response.into_inner().admitted);
        }

        let response = service.attempt(attempt_request("meta", "org-1")).await.unwrap();
        assert!(!response.into_inner().admitted);

        let remaining = service
            .remaining(Request::new(RemainingRequest {
                platform: "meta".to_string(),
                identifier: "org-1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(remaining.remaining, 0);
        assert_eq!(remaining.limit, 3);
        assert_eq!(remaining.count, 3);
        assert!(remaining.reset_at.is_some());
        assert!(!remaining.unbounded);
    }

    #[tokio::test]
    async fn test_remaining_for_unconfigured_platform() {
        let service = service(PolicyTable::defaults());

        let remaining = service
            .remaining(Request::new(RemainingRequest {
                platform: "pinterest".to_string(),
                identifier: "org-1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(remaining.unbounded);
        assert_eq!(remaining.limit, u64::MAX);
        assert!(remaining.reset_at.is_none());
    }

    #[tokio::test]
    async fn test_reset_restores_quota() {
        let service = service(meta_three_per_minute());

        for _ in 0..4 {
            service.attempt(attempt_request("meta", "org-1")).await.unwrap();
        }

        service
            .reset(Request::new(ResetRequest {
                platform: "meta".to_string(),
                identifier: "org-1".to_string(),
            }))
            .await
            .unwrap();

        let response = service.attempt(attempt_request("meta", "org-1")).await.unwrap();
        assert!(response.into_inner().admitted);
    }

    #[tokio::test]
    async fn test_wait_until_ready_uses_default_budget() {
        let service = service(meta_three_per_minute());
        for _ in 0..3 {
            service.attempt(attempt_request("meta", "org-1")).await.unwrap();
        }

        let response = service
            .wait_until_ready(Request::new(WaitUntilReadyRequest {
                platform: "meta".to_string(),
                identifier: "org-1".to_string(),
                max_wait: None,
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(!response.admitted);
        let waited = Duration::try_from(response.waited.unwrap()).unwrap();
        assert!(waited >= Duration::from_millis(900));
        assert!(waited < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_wait_until_ready_rejects_negative_budget() {
        let service = service(meta_three_per_minute());

        let result = service
            .wait_until_ready(Request::new(WaitUntilReadyRequest {
                platform: "meta".to_string(),
                identifier: "org-1".to_string(),
                max_wait: Some(prost_types::Duration {
                    seconds: -1,
                    nanos: 0,
                }),
            }))
            .await;

        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_wait_until_ready_rejects_budget_above_cap() {
        let service = service(meta_three_per_minute());

        let result = service
            .wait_until_ready(wait_request(Some(Duration::from_secs(365 * 86400))))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);

        // Exactly the cap is allowed, and capacity is free so it returns at once.
        let response = service
            .wait_until_ready(wait_request(Some(Duration::from_secs(10))))
            .await
            .unwrap()
            .into_inner();
        assert!(response.admitted);
    }

    #[tokio::test]
    async fn test_default_budget_is_clamped_to_cap() {
        let rate_limiter = Arc::new(PlatformRateLimiter::in_memory(meta_three_per_minute()));
        let service = RateLimitServiceImpl::new(
            rate_limiter,
            Duration::from_secs(600),
            Duration::from_secs(1),
        );
        for _ in 0..3 {
            service.attempt(attempt_request("meta", "org-1")).await.unwrap();
        }

        let started = std::time::Instant::now();
        let response = service.wait_until_ready(wait_request(None)).await.unwrap();
        assert!(!response.into_inner().admitted);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_shutdown_releases_pending_wait() {
        let (stop, stopping) = watch::channel(false);
        let service = service(meta_three_per_minute()).with_shutdown(stopping);
        for _ in 0..3 {
            service.attempt(attempt_request("meta", "org-1")).await.unwrap();
        }

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stop.send(true).unwrap();
        });

        let started = std::time::Instant::now();
        let response = service
            .wait_until_ready(wait_request(Some(Duration::from_secs(10))))
            .await
            .unwrap()
            .into_inner();

        assert!(!response.admitted);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_get_all_limits() {
        let service = service(PolicyTable::defaults());

        let response = service
            .get_all_limits(Request::new(GetAllLimitsRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.policies.len(), 8);
        let twitter = response
            .policies
            .iter()
            .find(|p| p.platform == "twitter")
            .unwrap();
        assert_eq!(twitter.call_limit, 300);
        assert_eq!(twitter.window_seconds, 900);
    }
}
