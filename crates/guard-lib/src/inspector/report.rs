//! Health report data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed taxonomy of post-sync failure modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IssueType {
    Unschedulable,
    ImagePullBackOff,
    ErrImagePull,
    CreateContainerConfigError,
    RunContainerError,
    CrashLoopBackOff,
    ContainerCrash,
    PreviousCrash,
    NotReady,
    Pending,
    PodFailed,
    ProgressDeadlineExceeded,
    DeploymentUnavailable,
    UnavailableReplicas,
    InsufficientReadyReplicas,
    InitContainerWaiting,
    HealthCheckError,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Unschedulable => "Unschedulable",
            IssueType::ImagePullBackOff => "ImagePullBackOff",
            IssueType::ErrImagePull => "ErrImagePull",
            IssueType::CreateContainerConfigError => "CreateContainerConfigError",
            IssueType::RunContainerError => "RunContainerError",
            IssueType::CrashLoopBackOff => "CrashLoopBackOff",
            IssueType::ContainerCrash => "ContainerCrash",
            IssueType::PreviousCrash => "PreviousCrash",
            IssueType::NotReady => "NotReady",
            IssueType::Pending => "Pending",
            IssueType::PodFailed => "PodFailed",
            IssueType::ProgressDeadlineExceeded => "ProgressDeadlineExceeded",
            IssueType::DeploymentUnavailable => "DeploymentUnavailable",
            IssueType::UnavailableReplicas => "UnavailableReplicas",
            IssueType::InsufficientReadyReplicas => "InsufficientReadyReplicas",
            IssueType::InitContainerWaiting => "InitContainerWaiting",
            IssueType::HealthCheckError => "HealthCheckError",
        }
    }

    /// Issue types that make a report `error` rather than `warning`
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            IssueType::ImagePullBackOff
                | IssueType::ErrImagePull
                | IssueType::CrashLoopBackOff
                | IssueType::Unschedulable
                | IssueType::PodFailed
                | IssueType::CreateContainerConfigError
                | IssueType::RunContainerError
                | IssueType::ProgressDeadlineExceeded
                | IssueType::HealthCheckError
        )
    }

    /// Container-specific causes that make a generic `UnavailableReplicas`
    /// redundant
    pub fn is_container_specific(&self) -> bool {
        matches!(
            self,
            IssueType::ImagePullBackOff
                | IssueType::ErrImagePull
                | IssueType::CrashLoopBackOff
                | IssueType::Unschedulable
                | IssueType::CreateContainerConfigError
                | IssueType::RunContainerError
        )
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Warning event attached to an issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEvent {
    pub reason: Option<String>,
    pub message: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<IssueEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthIssue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<IssueDetails>,
}

impl HealthIssue {
    pub fn new(issue_type: IssueType, message: impl Into<String>) -> Self {
        Self {
            issue_type,
            message: message.into(),
            pod_name: None,
            container_name: None,
            reason: None,
            details: None,
        }
    }

    pub fn pod(mut self, pod_name: &str) -> Self {
        self.pod_name = Some(pod_name.to_string());
        self
    }

    pub fn container(mut self, container_name: &str) -> Self {
        self.container_name = Some(container_name.to_string());
        self
    }

    pub fn reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.filter(|r| !r.is_empty()).map(str::to_string);
        self
    }

    pub fn details(mut self, details: IssueDetails) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "ok",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == Severity::Ok
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedAction {
    pub title: String,
    pub description: String,
    /// Command an operator can run to investigate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_hint: Option<String>,
}

impl SuggestedAction {
    pub fn new(title: &str, description: &str, hint: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            remediation_hint: Some(hint.into()),
        }
    }
}

/// Diagnosis of one service after a sync
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub namespace: String,
    pub service_name: String,
    pub severity: Severity,
    pub summary: String,
    pub issues: Vec<HealthIssue>,
    pub suggested_actions: Vec<SuggestedAction>,
    pub detected_at: DateTime<Utc>,
}

impl HealthReport {
    /// Report for a health check that could not run to completion
    pub fn check_failed(namespace: &str, service_name: &str, error: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            service_name: service_name.to_string(),
            severity: Severity::Error,
            summary: format!("Health check failed for {}: {}", service_name, error),
            issues: vec![HealthIssue::new(IssueType::HealthCheckError, error)],
            suggested_actions: vec![SuggestedAction::new(
                "Check deployment manually",
                "Verify deployment status and pod health",
                format!("oc get deploy/{} -n {}", service_name, namespace),
            )],
            detected_at: Utc::now(),
        }
    }

    /// Report for a deployment that neither failed nor converged in time
    pub fn still_stabilizing(namespace: &str, service_name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            service_name: service_name.to_string(),
            severity: Severity::Warning,
            summary: format!(
                "Health check timeout for {}: deployment may still be stabilizing",
                service_name
            ),
            issues: Vec::new(),
            suggested_actions: vec![SuggestedAction::new(
                "Check rollout status",
                "The deployment had not converged when the health check gave up",
                format!("oc rollout status deploy/{} -n {}", service_name, namespace),
            )],
            detected_at: Utc::now(),
        }
    }

    pub fn has_issue(&self, issue_type: IssueType) -> bool {
        self.issues.iter().any(|i| i.issue_type == issue_type)
    }
}
