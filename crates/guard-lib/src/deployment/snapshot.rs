//! Point-in-time views of a Deployment and its Pods
//!
//! Snapshots are built fresh on every poll and never cached between polls.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition};
use k8s_openapi::api::core::v1::{
    ContainerState as WireContainerState, ContainerStatus, Pod, PodCondition,
};
use serde::Serialize;

pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_POD_SCHEDULED: &str = "PodScheduled";

/// Replicas assumed by the API server when `spec.replicas` is omitted
const DEFAULT_REPLICAS: i32 = 1;

/// Deployment or pod condition, reduced to the fields we classify on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }

    pub fn is_false(&self) -> bool {
        self.status == "False"
    }
}

impl From<DeploymentCondition> for Condition {
    fn from(c: DeploymentCondition) -> Self {
        Self {
            type_: c.type_,
            status: c.status,
            reason: c.reason,
            message: c.message,
        }
    }
}

impl From<PodCondition> for Condition {
    fn from(c: PodCondition) -> Self {
        Self {
            type_: c.type_,
            status: c.status,
            reason: c.reason,
            message: c.message,
        }
    }
}

fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerRef {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStatus {
    pub generation: i64,
    pub observed_generation: i64,
    pub replicas: i32,
    pub updated_replicas: i32,
    pub available_replicas: i32,
    pub ready_replicas: i32,
    pub unavailable_replicas: i32,
    pub conditions: Vec<Condition>,
}

impl RolloutStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        find_condition(&self.conditions, type_)
    }

    pub fn condition_true(&self, type_: &str) -> bool {
        self.condition(type_).map(Condition::is_true).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSnapshot {
    pub name: String,
    pub containers: Vec<ContainerRef>,
    pub declared_replicas: i32,
    pub status: RolloutStatus,
    pub labels: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
}

impl DeploymentSnapshot {
    /// Rollout has converged on `desired_replicas`.
    ///
    /// The controller must have observed the latest generation; counters from
    /// an older generation describe the previous ReplicaSet.
    pub fn rollout_complete(&self, desired_replicas: i32) -> bool {
        let st = &self.status;
        st.observed_generation >= st.generation
            && st.updated_replicas >= desired_replicas
            && st.available_replicas >= desired_replicas
            && st.condition_true(CONDITION_AVAILABLE)
    }

    /// `spec.selector.matchLabels` rendered as a label selector string
    pub fn label_selector(&self) -> Option<String> {
        if self.selector.is_empty() {
            return None;
        }
        Some(
            self.selector
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// Index of the primary container: the one named after the deployment.
    pub fn container_index(&self, name: &str) -> Option<usize> {
        self.containers.iter().position(|c| c.name == name)
    }

    /// Ready pods, falling back to available pods
    pub fn pod_count(&self) -> i32 {
        if self.status.ready_replicas > 0 {
            self.status.ready_replicas
        } else {
            self.status.available_replicas
        }
    }
}

impl From<Deployment> for DeploymentSnapshot {
    fn from(d: Deployment) -> Self {
        let spec = d.spec.unwrap_or_default();
        let st = d.status.unwrap_or_default();
        let status = RolloutStatus {
            generation: d.metadata.generation.unwrap_or(0),
            observed_generation: st.observed_generation.unwrap_or(0),
            replicas: st.replicas.unwrap_or(0),
            updated_replicas: st.updated_replicas.unwrap_or(0),
            available_replicas: st.available_replicas.unwrap_or(0),
            ready_replicas: st.ready_replicas.unwrap_or(0),
            unavailable_replicas: st.unavailable_replicas.unwrap_or(0),
            conditions: st
                .conditions
                .unwrap_or_default()
                .into_iter()
                .map(Condition::from)
                .collect(),
        };

        let containers = spec
            .template
            .spec
            .map(|pod_spec| pod_spec.containers)
            .unwrap_or_default();

        Self {
            name: d.metadata.name.unwrap_or_default(),
            containers: containers
                .into_iter()
                .map(|c| ContainerRef {
                    name: c.name,
                    image: c.image.unwrap_or_default(),
                })
                .collect(),
            declared_replicas: spec.replicas.unwrap_or(DEFAULT_REPLICAS),
            status,
            labels: d.metadata.labels.unwrap_or_default(),
            selector: spec.selector.match_labels.unwrap_or_default(),
        }
    }
}

/// Observed container state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ContainerState {
    Waiting {
        reason: Option<String>,
        message: Option<String>,
    },
    Running,
    Terminated {
        reason: Option<String>,
        exit_code: Option<i32>,
        message: Option<String>,
    },
    Unknown,
}

impl ContainerState {
    fn from_wire(wire: Option<WireContainerState>) -> Self {
        let Some(wire) = wire else {
            return ContainerState::Unknown;
        };
        if let Some(t) = wire.terminated {
            ContainerState::Terminated {
                reason: t.reason,
                exit_code: Some(t.exit_code),
                message: t.message,
            }
        } else if let Some(w) = wire.waiting {
            ContainerState::Waiting {
                reason: w.reason,
                message: w.message,
            }
        } else if wire.running.is_some() {
            ContainerState::Running
        } else {
            ContainerState::Unknown
        }
    }

    pub fn waiting_reason(&self) -> Option<&str> {
        match self {
            ContainerState::Waiting { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSnapshot {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
    pub state: ContainerState,
    pub last_state: Option<ContainerState>,
}

impl From<ContainerStatus> for ContainerSnapshot {
    fn from(cs: ContainerStatus) -> Self {
        let last_state = match ContainerState::from_wire(cs.last_state) {
            ContainerState::Unknown => None,
            other => Some(other),
        };
        Self {
            name: cs.name,
            ready: cs.ready,
            restart_count: cs.restart_count,
            state: ContainerState::from_wire(cs.state),
            last_state,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSnapshot {
    pub name: String,
    pub phase: Option<String>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub conditions: Vec<Condition>,
    pub container_statuses: Vec<ContainerSnapshot>,
    pub init_container_statuses: Vec<ContainerSnapshot>,
}

impl PodSnapshot {
    /// A pod is terminating iff it carries a deletion timestamp
    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn phase_is(&self, phase: &str) -> bool {
        self.phase.as_deref() == Some(phase)
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        find_condition(&self.conditions, type_)
    }
}

impl From<Pod> for PodSnapshot {
    fn from(p: Pod) -> Self {
        let status = p.status.unwrap_or_default();
        Self {
            name: p.metadata.name.unwrap_or_else(|| "unknown".to_string()),
            phase: status.phase,
            deletion_timestamp: p.metadata.deletion_timestamp.map(|t| t.0),
            conditions: status
                .conditions
                .unwrap_or_default()
                .into_iter()
                .map(Condition::from)
                .collect(),
            container_statuses: status
                .container_statuses
                .unwrap_or_default()
                .into_iter()
                .map(ContainerSnapshot::from)
                .collect(),
            init_container_statuses: status
                .init_container_statuses
                .unwrap_or_default()
                .into_iter()
                .map(ContainerSnapshot::from)
                .collect(),
        }
    }
}
