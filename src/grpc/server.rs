//! gRPC server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::platform_rate_limit_service_server::PlatformRateLimitServiceServer;
use super::service::RateLimitServiceImpl;
use crate::error::{LimiterError, Result};
use crate::ratelimit::RateLimiterBackend;

/// gRPC server for the platform rate limit service.
pub struct GrpcServer<R: RateLimiterBackend + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<R>,
    /// Wait budget for requests that do not carry one
    default_max_wait: Duration,
    /// Largest wait budget a request may ask for
    max_wait_cap: Duration,
}

impl<R: RateLimiterBackend + 'static> GrpcServer<R> {
    /// Create a new gRPC server.
    pub fn new(
        addr: SocketAddr,
        rate_limiter: Arc<R>,
        default_max_wait: Duration,
        max_wait_cap: Duration,
    ) -> Self {
        Self {
            addr,
            rate_limiter,
            default_max_wait,
            max_wait_cap,
        }
    }

    /// Start the gRPC server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending::<()>()).await
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves. Pending
    /// `WaitUntilReady` calls are answered with `admitted = false` at that
    /// point instead of holding the drain open until their budget runs out.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_with_listener(listener, signal).await
    }

    /// Serve on an already bound listener. `addr` is ignored.
    pub async fn serve_with_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (stop, stopping) = watch::channel(false);
        let service =
            RateLimitServiceImpl::new(self.rate_limiter, self.default_max_wait, self.max_wait_cap)
                .with_shutdown(stopping);

        info!(
            addr = %listener.local_addr()?,
            "Starting gRPC server for PlatformRateLimitService"
        );

        let signal = async move {
            signal.await;
            info!("Shutdown requested, releasing pending waits");
            let _ = stop.send(true);
        };

        Server::builder()
            .add_service(PlatformRateLimitServiceServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                LimiterError::Grpc(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::proto::{AttemptRequest, WaitUntilReadyRequest};
    use crate::grpc::PlatformRateLimitServiceClient;
    use crate::ratelimit::{PlatformRateLimiter, PolicyTable, RateLimitPolicy};
    use tokio::sync::oneshot;

    async fn local_listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    async fn test_server_shuts_down_on_signal() {
        let (listener, addr) = local_listener().await;
        let rate_limiter = Arc::new(PlatformRateLimiter::in_memory(PolicyTable::defaults()));
        let server = GrpcServer::new(
            addr,
            rate_limiter,
            Duration::from_secs(1),
            Duration::from_secs(10),
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            server.serve_with_listener(listener, tokio::time::sleep(Duration::from_millis(100))),
        )
        .await;

        assert!(result.is_ok(), "server did not stop after the shutdown signal");
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_out_pending_waits() {
        let (listener, addr) = local_listener().await;
        let policies =
            PolicyTable::from_policies([RateLimitPolicy::new("tiktok", 1, 3600, 0)]).unwrap();
        let rate_limiter = Arc::new(PlatformRateLimiter::in_memory(policies));
        let server = GrpcServer::new(
            addr,
            rate_limiter,
            Duration::from_secs(1),
            Duration::from_secs(60),
        );

        let (stop, stopped) = oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve_with_listener(listener, async move {
            let _ = stopped.await;
        }));

        let mut client = PlatformRateLimitServiceClient::connect(format!("http://{}", addr))
            .await
            .unwrap();
        let first = client
            .attempt(AttemptRequest {
                platform: "tiktok".to_string(),
                identifier: "int-1".to_string(),
            })
            .await
            .unwrap()
            .into_inner();
        assert!(first.admitted);

        let waiting = tokio::spawn(async move {
            client
                .wait_until_ready(WaitUntilReadyRequest {
                    platform: "tiktok".to_string(),
                    identifier: "int-1".to_string(),
                    max_wait: Some(prost_types::Duration {
                        seconds: 30,
                        nanos: 0,
                    }),
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(3), serving).await;
        assert!(result.is_ok(), "server held shutdown open for a pending wait");
        assert!(result.unwrap().unwrap().is_ok());

        if let Ok(response) = waiting.await.unwrap() {
            assert!(!response.into_inner().admitted);
        }
    }
}
