//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use image_syncer_core::config::{split_list, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};
use image_syncer_core::SyncConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Image Syncer: keeps a registry populated with the images workloads run.
#[derive(Parser, Debug, Clone)]
#[command(name = "image-syncer", version, about)]
pub struct Args {
    /// Target registry URL (scheme optional).
    #[arg(long, env = "TARGET_REGISTRY_URL", default_value = "")]
    pub target_registry: String,

    /// Username for the target registry.
    #[arg(long, env = "TARGET_REGISTRY_USERNAME", default_value = "")]
    pub username: String,

    /// Password for the target registry.
    #[arg(
        long,
        env = "TARGET_REGISTRY_PASSWORD",
        default_value = "",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub password: String,

    /// Comma-separated namespaces to scan.
    #[arg(long, env = "NAMESPACES", default_value = "")]
    pub namespaces: String,

    /// Comma-separated deployment names; all deployments when empty.
    #[arg(long, env = "DEPLOYMENTS", default_value = "")]
    pub deployments: String,

    /// Interval between sync cycles.
    #[arg(long, env = "SYNC_PERIOD", default_value = "10m", value_parser = humantime::parse_duration)]
    pub sync_period: Duration,

    /// Retries per image after the first attempt.
    #[arg(long, env = "MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Fixed delay between retries.
    #[arg(long, env = "RETRY_DELAY", default_value = "10s", value_parser = humantime::parse_duration)]
    pub retry_delay: Duration,

    /// Maximum images synced at once.
    #[arg(long, env = "CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Container runtime socket; auto-detected when unset.
    #[arg(long, env = "CONTAINERD_SOCKET_PATH")]
    pub runtime_socket: Option<PathBuf>,

    /// Registries reached over plain HTTP (repeatable or comma-separated).
    #[arg(long = "insecure-registry", env = "INSECURE_REGISTRIES", value_delimiter = ',')]
    pub insecure_registries: Vec<String>,

    /// Listen address for the Prometheus endpoint.
    #[arg(long, env = "METRICS_ADDR", default_value = ":8080")]
    pub metrics_addr: String,

    /// Listen address for health probes.
    #[arg(long, env = "HEALTH_ADDR", default_value = ":8081")]
    pub health_addr: String,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Sync these images instead of discovering them from the cluster.
    #[arg(long, value_delimiter = ',')]
    pub images: Vec<String>,

    /// Run a single cycle and exit.
    #[arg(long)]
    pub once: bool,
}

impl Args {
    /// Build the sync configuration. Call [`SyncConfig::validate`] on the result.
    pub fn to_config(&self) -> SyncConfig {
        SyncConfig {
            target_registry: self.target_registry.clone(),
            registry_username: self.username.clone(),
            registry_password: self.password.clone(),
            namespaces: split_list(&self.namespaces),
            deployments: split_list(&self.deployments),
            sync_period: self.sync_period,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            concurrency: self.concurrency,
            runtime_socket: self.runtime_socket.clone(),
            insecure_registries: self
                .insecure_registries
                .iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect(),
            metrics_addr: self.metrics_addr.clone(),
            health_addr: self.health_addr.clone(),
            log_level: self.log_level.clone(),
        }
    }
}
