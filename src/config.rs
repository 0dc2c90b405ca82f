//! Configuration management for the platform limiter service.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `PLATFORM_LIMITER__*` environment variables (for example
//! `PLATFORM_LIMITER__SERVER__GRPC_ADDR=0.0.0.0:9000`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Result;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "PLATFORM_LIMITER";

/// Main configuration for the platform limiter service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to a YAML policy table. The built-in defaults apply when unset.
    #[serde(default)]
    pub policy_path: Option<String>,

    /// Policy file reload interval in seconds (0 disables reloading)
    #[serde(default = "default_reload_interval")]
    pub policy_reload_interval_secs: u64,

    /// Wait budget for `WaitUntilReady` calls that do not carry their own
    #[serde(default = "default_max_wait")]
    pub default_max_wait_secs: u64,

    /// Longest wait budget a `WaitUntilReady` caller may ask for
    #[serde(default = "default_max_wait_cap")]
    pub max_wait_cap_secs: u64,

    /// How often expired windows are swept from the in-memory store
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            policy_path: None,
            policy_reload_interval_secs: default_reload_interval(),
            default_max_wait_secs: default_max_wait(),
            max_wait_cap_secs: default_max_wait_cap(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

impl RateLimitingConfig {
    /// Wait budget for requests without one, never above the cap.
    pub fn default_max_wait(&self) -> Duration {
        Duration::from_secs(self.default_max_wait_secs.min(self.max_wait_cap_secs))
    }

    /// Upper bound on any requested wait budget.
    pub fn max_wait_cap(&self) -> Duration {
        Duration::from_secs(self.max_wait_cap_secs)
    }
}

fn default_reload_interval() -> u64 {
    60
}

fn default_max_wait() -> u64 {
    30
}

fn default_max_wait_cap() -> u64 {
    300
}

fn default_purge_interval() -> u64 {
    300
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LimiterConfig {
    /// Load configuration from an optional YAML file, applying environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::new(path, config::FileFormat::Yaml).required(true),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LimiterConfig::default();
        assert_eq!(config.server.grpc_addr, "127.0.0.1:8081".parse().unwrap());
        assert!(config.rate_limiting.policy_path.is_none());
        assert_eq!(config.rate_limiting.policy_reload_interval_secs, 60);
        assert_eq!(config.rate_limiting.default_max_wait(), Duration::from_secs(30));
        assert_eq!(config.rate_limiting.max_wait_cap(), Duration::from_secs(300));
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
server:
  grpc_addr: "0.0.0.0:9000"
rate_limiting:
  policy_path: /etc/platform-limiter/policies.yaml
logging:
  format: json
"#;
        let config: LimiterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.grpc_addr.port(), 9000);
        assert_eq!(
            config.rate_limiting.policy_path.as_deref(),
            Some("/etc/platform-limiter/policies.yaml")
        );
        assert_eq!(config.rate_limiting.default_max_wait_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "platform-limiter-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "rate_limiting:\n  default_max_wait_secs: 5\n  purge_interval_secs: 10\n",
        )
        .unwrap();

        let config = LimiterConfig::load(path.to_str()).unwrap();
        assert_eq!(config.rate_limiting.default_max_wait_secs, 5);
        assert_eq!(config.rate_limiting.purge_interval_secs, 10);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_default_wait_never_exceeds_cap() {
        let yaml = r#"
rate_limiting:
  default_max_wait_secs: 600
  max_wait_cap_secs: 120
"#;
        let config: LimiterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.rate_limiting.default_max_wait(), Duration::from_secs(120));
        assert_eq!(config.rate_limiting.max_wait_cap(), Duration::from_secs(120));
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let result = LimiterConfig::load(Some("/nonexistent/platform-limiter.yaml"));
        assert!(result.is_err());
    }
}
