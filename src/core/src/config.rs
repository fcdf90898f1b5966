use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Default interval between reconciliation cycles.
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default fixed delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Default number of images synced at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Syncer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Target registry URL or host (e.g. "registry.internal" or "https://registry.internal/")
    pub target_registry: String,

    /// Target registry username
    pub registry_username: String,

    /// Target registry password
    #[serde(skip_serializing)]
    pub registry_password: String,

    /// Namespaces whose workloads are scanned
    pub namespaces: Vec<String>,

    /// Optional deployment names to restrict the scan to
    pub deployments: Vec<String>,

    /// Interval between reconciliation cycles
    #[serde(with = "humantime_serde")]
    pub sync_period: Duration,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Fixed delay between attempts
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Maximum number of images synced concurrently
    pub concurrency: usize,

    /// Explicit container runtime socket (skips auto-detection)
    pub runtime_socket: Option<PathBuf>,

    /// Registries reached over plain HTTP
    pub insecure_registries: Vec<String>,

    /// Metrics listen address
    pub metrics_addr: String,

    /// Health probe listen address
    pub health_addr: String,

    /// Log level
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            target_registry: String::new(),
            registry_username: String::new(),
            registry_password: String::new(),
            namespaces: Vec::new(),
            deployments: Vec::new(),
            sync_period: DEFAULT_SYNC_PERIOD,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            concurrency: DEFAULT_CONCURRENCY,
            runtime_socket: None,
            insecure_registries: Vec::new(),
            metrics_addr: ":8080".to_string(),
            health_addr: ":8081".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Check that every required value is present and in range.
    pub fn validate(&self) -> Result<()> {
        if self.target_host().is_empty() {
            return Err(SyncError::ConfigError(
                "TARGET_REGISTRY_URL is required".to_string(),
            ));
        }
        if self.target_host().contains('/') {
            return Err(SyncError::ConfigError(format!(
                "TARGET_REGISTRY_URL must be a registry host without a path: {}",
                self.target_registry
            )));
        }
        if self.registry_username.is_empty() {
            return Err(SyncError::ConfigError(
                "TARGET_REGISTRY_USERNAME is required".to_string(),
            ));
        }
        if self.registry_password.is_empty() {
            return Err(SyncError::ConfigError(
                "TARGET_REGISTRY_PASSWORD is required".to_string(),
            ));
        }
        if self.namespaces.is_empty() {
            return Err(SyncError::ConfigError("NAMESPACES is required".to_string()));
        }
        if self.sync_period.is_zero() {
            return Err(SyncError::ConfigError(
                "SYNC_PERIOD must be positive".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(SyncError::ConfigError(
                "CONCURRENCY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Target registry host without scheme or trailing slash.
    pub fn target_host(&self) -> &str {
        let url = self.target_registry.trim();
        let url = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        url.trim_end_matches('/')
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
