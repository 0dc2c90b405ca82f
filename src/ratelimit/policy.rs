//! Per-platform quota policies.
//!
//! A policy table maps each external platform to the quota it publishes. The
//! table is loaded once (built-in defaults or a YAML file) and handed to the
//! engine; platforms missing from it are not throttled at all.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{LimiterError, Result};

/// Longest window a policy may declare (366 days).
pub const MAX_WINDOW_SECONDS: u64 = 366 * 86400;

/// Quota published by one external platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Platform name, matched exactly against the caller's platform argument
    pub platform: String,
    /// Maximum calls admitted per window
    pub call_limit: u64,
    /// Window length in seconds
    pub window_seconds: u64,
    /// Extra soft allowance. Carried as configuration only; admission never reads it.
    #[serde(default)]
    pub burst_allowance: u64,
}

impl RateLimitPolicy {
    pub fn new(platform: &str, call_limit: u64, window_seconds: u64, burst_allowance: u64) -> Self {
        Self {
            platform: platform.to_string(),
            call_limit,
            window_seconds,
            burst_allowance,
        }
    }

    /// The window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.platform.is_empty() {
            return Err(LimiterError::Config("policy platform must not be empty".to_string()));
        }
        if self.call_limit == 0 {
            return Err(LimiterError::Config(format!(
                "policy for {} must have a positive call_limit",
                self.platform
            )));
        }
        if self.window_seconds == 0 || self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(LimiterError::Config(format!(
                "policy for {} must have a window_seconds between 1 and {}",
                self.platform, MAX_WINDOW_SECONDS
            )));
        }
        Ok(())
    }
}

/// On-disk shape of a policy file.
#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policies: Vec<RateLimitPolicy>,
}

/// The set of policies, at most one per platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTable {
    policies: BTreeMap<String, RateLimitPolicy>,
}

impl PolicyTable {
    /// Create an empty table. Every platform is unthrottled.
    pub fn new() -> Self {
        Self::default()
    }

    /// The published quotas of the platforms the application integrates with.
    pub fn defaults() -> Self {
        let mut table = Self::new();
        for policy in [
            RateLimitPolicy::new("meta", 200, 3600, 50),
            RateLimitPolicy::new("facebook", 200, 3600, 50),
            RateLimitPolicy::new("instagram", 200, 3600, 50),
            RateLimitPolicy::new("tiktok", 100, 3600, 20),
            RateLimitPolicy::new("linkedin", 100, 86400, 20),
            RateLimitPolicy::new("twitter", 300, 900, 50),
            RateLimitPolicy::new("google", 15000, 86400, 1000),
            RateLimitPolicy::new("snapchat", 100, 3600, 20),
        ] {
            table.policies.insert(policy.platform.clone(), policy);
        }
        table
    }

    /// Build a table from a list of policies, rejecting invalid or duplicate entries.
    pub fn from_policies<I>(policies: I) -> Result<Self>
    where
        I: IntoIterator<Item = RateLimitPolicy>,
    {
        let mut table = Self::new();
        for policy in policies {
            table.insert(policy)?;
        }
        Ok(table)
    }

    /// Add a policy for a platform that has none yet.
    pub fn insert(&mut self, policy: RateLimitPolicy) -> Result<()> {
        policy.validate()?;
        if self.policies.contains_key(&policy.platform) {
            return Err(LimiterError::Config(format!(
                "duplicate policy for platform {}",
                policy.platform
            )));
        }
        self.policies.insert(policy.platform.clone(), policy);
        Ok(())
    }

    /// Load a table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading platform rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a table from a YAML string of the form `policies: [...]`.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PolicyFile = serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse policy file: {}", e)))?;
        Self::from_policies(file.policies)
    }

    /// Look up the policy for a platform.
    pub fn get(&self, platform: &str) -> Option<&RateLimitPolicy> {
        self.policies.get(platform)
    }

    /// Policies in platform-name order.
    pub fn iter(&self) -> impl Iterator<Item = &RateLimitPolicy> {
        self.policies.values()
    }

    /// Number of configured platforms.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// A copy of the table keyed by platform.
    pub fn to_map(&self) -> BTreeMap<String, RateLimitPolicy> {
        self.policies.clone()
    }
}
