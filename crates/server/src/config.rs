//! Server configuration

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use guard_lib::batch::BatchOptions;
use guard_lib::cluster::ClusterConfig;
use guard_lib::deployment::{PodScope, WaitOptions};
use guard_lib::inspector::HealthCheckOptions;
use guard_lib::sync::SyncOptions;
use serde::Deserialize;

const IN_CLUSTER_TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Rollout guard configuration, read from `GUARD_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// Port for the sync API, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Cluster API server used when a request does not name one
    #[serde(default = "default_cluster_url")]
    pub cluster_url: String,

    /// Bearer token; takes precedence over `cluster_token_file`
    #[serde(default)]
    pub cluster_token: Option<String>,

    #[serde(default)]
    pub cluster_token_file: Option<String>,

    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_poll_ms")]
    pub rollout_poll_ms: u64,
    #[serde(default = "default_wait_timeout_ms")]
    pub rollout_timeout_ms: u64,

    #[serde(default = "default_poll_ms")]
    pub terminating_poll_ms: u64,
    #[serde(default = "default_wait_timeout_ms")]
    pub terminating_timeout_ms: u64,

    #[serde(default = "default_poll_ms")]
    pub health_poll_ms: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,

    /// Pods the terminating-pod wait watches: `deployment` or `namespace`
    #[serde(default)]
    pub pod_scope: PodScope,

    #[serde(default = "default_poll_ms")]
    pub between_services_delay_ms: u64,

    /// How often the cluster `/version` probe runs
    #[serde(default = "default_probe_interval")]
    pub cluster_probe_interval_secs: u64,
}

fn default_api_port() -> u16 {
    8080
}

fn default_cluster_url() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_poll_ms() -> u64 {
    2_000
}

fn default_wait_timeout_ms() -> u64 {
    60_000
}

fn default_health_timeout_ms() -> u64 {
    300_000
}

fn default_probe_interval() -> u64 {
    30
}

impl GuardConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_source(None)
    }

    /// Load from an explicit variable map instead of the process environment
    pub fn from_source(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("GUARD")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?;

        config
            .try_deserialize()
            .context("invalid GUARD_* configuration")
    }

    /// Bearer token for the configured cluster
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(token) = self.cluster_token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }

        let path = self
            .cluster_token_file
            .as_deref()
            .unwrap_or(IN_CLUSTER_TOKEN_FILE);
        let token = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cluster token from {}", path))?;
        Ok(token.trim().to_string())
    }

    pub fn cluster_config(&self) -> Result<ClusterConfig> {
        let mut cluster = ClusterConfig::new(&self.cluster_url, self.resolve_token()?);
        cluster.request_timeout = Duration::from_secs(self.request_timeout_secs);
        cluster.insecure_skip_tls_verify = self.insecure_skip_tls_verify;
        Ok(cluster)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            rollout: WaitOptions::from_millis(self.rollout_poll_ms, self.rollout_timeout_ms),
            terminating: WaitOptions::from_millis(self.terminating_poll_ms, self.terminating_timeout_ms),
            health: HealthCheckOptions::from_millis(self.health_poll_ms, self.health_timeout_ms),
            pod_scope: self.pod_scope,
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            sync: self.sync_options(),
            between_services_delay: Duration::from_millis(self.between_services_delay_ms),
        }
    }

    pub fn cluster_probe_interval(&self) -> Duration {
        Duration::from_secs(self.cluster_probe_interval_secs.max(1))
    }
}
