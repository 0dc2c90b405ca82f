use tonic_build::manual::{Builder, Method, Service};

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::grpc::proto::{}", input))
        .output_type(format!("crate::grpc::proto::{}", output))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Messages are hand-written prost structs in src/grpc/proto.rs, so the
    // service stubs are generated without invoking protoc.
    let service = Service::builder()
        .name("PlatformRateLimitService")
        .package("platform_limiter.v1")
        .method(unary("attempt", "Attempt", "AttemptRequest", "AttemptResponse"))
        .method(unary("remaining", "Remaining", "RemainingRequest", "RemainingResponse"))
        .method(unary(
            "wait_until_ready",
            "WaitUntilReady",
            "WaitUntilReadyRequest",
            "WaitUntilReadyResponse",
        ))
        .method(unary("reset", "Reset", "ResetRequest", "ResetResponse"))
        .method(unary(
            "get_all_limits",
            "GetAllLimits",
            "GetAllLimitsRequest",
            "GetAllLimitsResponse",
        ))
        .build();

    Builder::new()
        .build_server(true)
        .build_client(true)
        .compile(&[service]);
}
