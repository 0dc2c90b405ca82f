//! Wire messages for `platform_limiter.v1.PlatformRateLimitService`.
//!
//! The service stubs are generated by `build.rs` from these types.

/// Identifies the caller asking to use a platform.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttemptRequest {
    #[prost(string, tag = "1")]
    pub platform: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub identifier: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttemptResponse {
    #[prost(bool, tag = "1")]
    pub admitted: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemainingRequest {
    #[prost(string, tag = "1")]
    pub platform: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub identifier: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemainingResponse {
    #[prost(uint64, tag = "1")]
    pub remaining: u64,
    #[prost(uint64, tag = "2")]
    pub limit: u64,
    #[prost(uint64, tag = "3")]
    pub count: u64,
    /// Unset when the platform is not throttled
    #[prost(message, optional, tag = "4")]
    pub reset_at: ::core::option::Option<::prost_types::Timestamp>,
    /// True when the platform has no policy
    #[prost(bool, tag = "5")]
    pub unbounded: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WaitUntilReadyRequest {
    #[prost(string, tag = "1")]
    pub platform: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub identifier: ::prost::alloc::string::String,
    /// Falls back to the server's configured default when unset
    #[prost(message, optional, tag = "3")]
    pub max_wait: ::core::option::Option<::prost_types::Duration>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WaitUntilReadyResponse {
    #[prost(bool, tag = "1")]
    pub admitted: bool,
    #[prost(message, optional, tag = "2")]
    pub waited: ::core::option::Option<::prost_types::Duration>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResetRequest {
    #[prost(string, tag = "1")]
    pub platform: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub identifier: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResetResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAllLimitsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Policy {
    #[prost(string, tag = "1")]
    pub platform: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub call_limit: u64,
    #[prost(uint64, tag = "3")]
    pub window_seconds: u64,
    #[prost(uint64, tag = "4")]
    pub burst_allowance: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAllLimitsResponse {
    #[prost(message, repeated, tag = "1")]
    pub policies: ::prost::alloc::vec::Vec<Policy>,
}

include!(concat!(
    env!("OUT_DIR"),
    "/platform_limiter.v1.PlatformRateLimitService.rs"
));
