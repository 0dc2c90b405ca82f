use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use platform_limiter::config::{LimiterConfig, LogFormat, LoggingConfig};
use platform_limiter::grpc::GrpcServer;
use platform_limiter::ratelimit::{PlatformRateLimiter, PolicyTable};

#[derive(Debug, Parser)]
#[command(name = "platform-limiter", version, about)]
struct Cli {
    /// Path to the service configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the internal gRPC admission service (default)
    Serve,
    /// Print the effective policy table as JSON
    Limits,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = LimiterConfig::load(cli.config.as_deref())?;

    init_tracing(&config.logging);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Limits => {
            let policies = load_policies(&config)?;
            println!("{}", serde_json::to_string_pretty(&policies.to_map())?);
            Ok(())
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn load_policies(config: &LimiterConfig) -> platform_limiter::error::Result<PolicyTable> {
    match &config.rate_limiting.policy_path {
        Some(path) => PolicyTable::from_file(path),
        None => Ok(PolicyTable::defaults()),
    }
}

async fn serve(config: LimiterConfig) -> anyhow::Result<()> {
    info!("Starting Platform Limiter");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(grpc_addr = %config.server.grpc_addr, "Configuration loaded");

    let policies = load_policies(&config)?;
    info!(platforms = policies.len(), "Rate limit policies loaded");

    let rate_limiter = Arc::new(PlatformRateLimiter::in_memory(policies));

    let mut background = vec![spawn_purge(
        rate_limiter.clone(),
        config.rate_limiting.purge_interval_secs,
    )];
    background.push(spawn_policy_reload(rate_limiter.clone(), &config));

    let grpc_server = GrpcServer::new(
        config.server.grpc_addr,
        rate_limiter,
        config.rate_limiting.default_max_wait(),
        config.rate_limiting.max_wait_cap(),
    );

    // Run the server with graceful shutdown on Ctrl+C
    let result = grpc_server.serve_with_shutdown(shutdown_signal()).await;

    for task in background.into_iter().flatten() {
        task.abort();
    }

    result?;
    info!("Platform Limiter stopped");
    Ok(())
}

/// Periodically drop expired windows from the in-memory store.
fn spawn_purge(rate_limiter: Arc<PlatformRateLimiter>, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = rate_limiter.store().purge_expired(chrono::Utc::now());
            if purged > 0 {
                info!(purged = purged, "Purged expired rate limit windows");
            }
        }
    }))
}

/// Re-read the policy file on an interval, keeping the old table if the new one is invalid.
fn spawn_policy_reload(
    rate_limiter: Arc<PlatformRateLimiter>,
    config: &LimiterConfig,
) -> Option<JoinHandle<()>> {
    let path = config.rate_limiting.policy_path.clone()?;
    let interval_secs = config.rate_limiting.policy_reload_interval_secs;
    if interval_secs == 0 {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = rate_limiter.reload_from_file(&path) {
                error!(path = %path, error = %e, "Failed to reload policies, keeping current table");
            }
        }
    }))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
