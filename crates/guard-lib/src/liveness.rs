//! Liveness and readiness tracking for the guard process
//!
//! Components report their own status; the cluster API component is kept
//! current by a periodic `GET /version` probe.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cluster::ClusterApi;

/// Component names tracked by the registry
pub mod components {
    pub const CLUSTER_API: &str = "cluster_api";
    pub const BATCH_CONTROLLER: &str = "batch_controller";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working, but with a problem worth surfacing
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: i64,
}

impl ComponentHealth {
    fn with(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            checked_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Worst status across all components
fn overall(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
    let statuses = components.values().map(|c| c.status);
    if statuses.clone().any(|s| s == ComponentStatus::Unhealthy) {
        ComponentStatus::Unhealthy
    } else if statuses.into_iter().any(|s| s == ComponentStatus::Degraded) {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Healthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LivenessRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    started: Arc<RwLock<bool>>,
}

impl LivenessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Flip once startup has finished
    pub async fn set_started(&self, started: bool) {
        *self.started.write().await = started;
    }

    pub async fn liveness(&self) -> LivenessResponse {
        let components = self.components.read().await.clone();
        LivenessResponse {
            status: overall(&components),
            components,
        }
    }

    /// Ready once started and the cluster API was last seen reachable
    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.started.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("Rollout guard not yet initialized".to_string()),
            };
        }

        let components = self.components.read().await;
        match components.get(components::CLUSTER_API) {
            Some(c) if c.status == ComponentStatus::Unhealthy => ReadinessResponse {
                ready: false,
                reason: Some(format!(
                    "Cluster API unreachable: {}",
                    c.message.as_deref().unwrap_or("unknown error")
                )),
            },
            _ => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }

    /// Probe the cluster once and record the outcome
    pub async fn probe_cluster(&self, cluster: &dyn ClusterApi) {
        match cluster.get("/version").await {
            Ok(version) => {
                debug!(git_version = ?version.get("gitVersion"), "Cluster API probe ok");
                self.set_healthy(components::CLUSTER_API).await;
            }
            Err(e) => {
                warn!(error = %e, "Cluster API probe failed");
                self.set_unhealthy(components::CLUSTER_API, e.to_string()).await;
            }
        }
    }

    /// Probe the cluster every `interval` until the task is aborted
    pub fn spawn_cluster_probe(&self, cluster: Arc<dyn ClusterApi>, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.probe_cluster(cluster.as_ref()).await;
            }
        })
    }
}
