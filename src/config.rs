//! Configuration management for ledgerlimit.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{LimiterError, Result};
use crate::ratelimit::{
    ConcurrencyPolicy, InsertMode, LimiterConfig, RateLimiter, ReferenceMode, DEFAULT_SHARDS,
};

/// Prefix for environment overrides, e.g. `LEDGERLIMIT_MAX_REQUESTS=50`.
pub const ENV_PREFIX: &str = "LEDGERLIMIT";

/// Unvalidated limiter settings as read from YAML or the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    /// Requests admitted per window
    pub max_requests: i64,

    /// Window length in seconds
    pub window_seconds: i64,

    /// Locking policy
    pub concurrency: ConcurrencyPolicy,

    /// Insertion discipline
    pub insert_mode: InsertMode,

    /// Eviction reference
    pub reference: ReferenceMode,

    /// Shard count for the sharded policy
    pub shards: usize,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
            concurrency: ConcurrencyPolicy::default(),
            insert_mode: InsertMode::default(),
            reference: ReferenceMode::default(),
            shards: DEFAULT_SHARDS,
        }
    }
}

fn default_max_requests() -> i64 {
    100
}

fn default_window_seconds() -> i64 {
    60
}

impl LimiterSettings {
    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse limiter settings: {}", e)))
    }

    /// Load settings from an optional file, then apply `LEDGERLIMIT_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading limiter settings");
            builder = builder.add_source(::config::File::from(path));
        }
        builder =
            builder.add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Validate into a [`LimiterConfig`].
    pub fn to_limiter_config(&self) -> Result<LimiterConfig> {
        Ok(LimiterConfig::new(self.max_requests, self.window_seconds)?
            .with_concurrency(self.concurrency)
            .with_insert_mode(self.insert_mode)
            .with_reference_mode(self.reference)
            .with_shards(self.shards))
    }

    /// Validate and construct a limiter.
    pub fn build(&self) -> Result<RateLimiter> {
        Ok(RateLimiter::new(self.to_limiter_config()?))
    }
}
