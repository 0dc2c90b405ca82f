//! Platform Limiter - admission control for outbound platform API calls
//!
//! Every call the application makes to an external ad platform (Meta, TikTok,
//! LinkedIn, Google, Twitter, Snapchat) first asks this crate whether the
//! platform's published quota allows it right now. Usage is tracked per
//! (platform, caller) pair in a shared window store; the engine can be used
//! in-process or through its internal gRPC service.

pub mod config;
pub mod error;
pub mod grpc;
pub mod ratelimit;
