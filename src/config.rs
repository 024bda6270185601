//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ratelimit::Algorithm;

/// Key prefix used when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "floodgate";

/// Main configuration for the Floodgate limiter core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Retry behavior for aborted store transactions
    #[serde(default)]
    pub retry: RetryConfig,

    /// Algorithm used to evaluate policies
    #[serde(default)]
    pub algorithm: Algorithm,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store URL (e.g. redis://localhost:6379)
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Namespace prefix applied to every key this crate writes
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound on any single store round-trip, in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

fn default_store_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_op_timeout_ms() -> u64 {
    1000
}

impl StoreConfig {
    /// Connection establishment timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-operation timeout.
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Retry behavior for store transactions the store reports as aborted.
///
/// Only aborted transactions are retried; an abort means the batch did not
/// apply, so repeating it cannot double-count. Unavailability (timeouts,
/// connection failures) is surfaced immediately because the fate of the
/// in-flight operation is unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per store operation, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff in milliseconds; doubled per attempt with jitter
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    10
}

impl FloodgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: FloodgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::FloodgateError::Config(e.to_string()))?;
        Ok(config)
    }
}
