//! Internal gRPC surface of the platform limiter.

mod server;
mod service;

pub mod proto;

pub use server::GrpcServer;
pub use service::RateLimitServiceImpl;

// Re-export commonly used types
pub use proto::platform_rate_limit_service_client::PlatformRateLimitServiceClient;
pub use proto::platform_rate_limit_service_server::{
    PlatformRateLimitService, PlatformRateLimitServiceServer,
};
