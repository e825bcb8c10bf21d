//! Pure classification of deployment and pod status into health issues

use std::collections::HashSet;

use crate::deployment::snapshot::{
    ContainerSnapshot, ContainerState, DeploymentSnapshot, PodSnapshot, CONDITION_AVAILABLE,
    CONDITION_POD_SCHEDULED, CONDITION_PROGRESSING,
};

use super::report::{HealthIssue, IssueDetails, IssueType, Severity};

/// Restarts beyond which a crashing container counts as crash-looping
const CRASH_LOOP_RESTARTS: i32 = 3;

const WAITING_CONTAINER_CREATING: &str = "ContainerCreating";
const WAITING_POD_INITIALIZING: &str = "PodInitializing";

/// Exit codes of a clean shutdown: success, SIGINT, SIGTERM
pub fn is_graceful_exit(exit_code: Option<i32>) -> bool {
    matches!(exit_code, Some(0) | Some(130) | Some(143))
}

fn is_startup_wait(reason: &str) -> bool {
    reason == WAITING_CONTAINER_CREATING || reason == WAITING_POD_INITIALIZING
}

/// Waiting reasons that always indicate a broken container
fn blocking_waiting_issue(reason: &str) -> Option<IssueType> {
    match reason {
        "ImagePullBackOff" | "ImagePullError" => Some(IssueType::ImagePullBackOff),
        "ErrImagePull" => Some(IssueType::ErrImagePull),
        "CreateContainerConfigError" => Some(IssueType::CreateContainerConfigError),
        "RunContainerError" => Some(IssueType::RunContainerError),
        _ => None,
    }
}

/// Deployment-level issues from conditions and replica counters.
///
/// Replica shortfalls are only reported once every desired replica has been
/// updated; a shortfall mid-rollout is expected.
pub fn classify_deployment(snapshot: &DeploymentSnapshot, desired_replicas: i32) -> Vec<HealthIssue> {
    let mut issues = Vec::new();
    let st = &snapshot.status;

    if let Some(cond) = st.condition(CONDITION_PROGRESSING).filter(|c| c.is_false()) {
        issues.push(
            HealthIssue::new(
                IssueType::ProgressDeadlineExceeded,
                cond.message
                    .clone()
                    .unwrap_or_else(|| "Deployment progress deadline exceeded".to_string()),
            )
            .reason(cond.reason.as_deref()),
        );
    }

    if let Some(cond) = st.condition(CONDITION_AVAILABLE).filter(|c| c.is_false()) {
        issues.push(
            HealthIssue::new(
                IssueType::DeploymentUnavailable,
                cond.message
                    .clone()
                    .unwrap_or_else(|| "Deployment is not available".to_string()),
            )
            .reason(cond.reason.as_deref()),
        );
    }

    let updated = st.updated_replicas >= desired_replicas && st.replicas >= desired_replicas;
    if updated && st.unavailable_replicas > 0 {
        issues.push(HealthIssue::new(
            IssueType::UnavailableReplicas,
            format!(
                "{} replica(s) are unavailable after rollout completion",
                st.unavailable_replicas
            ),
        ));
    }
    if updated && desired_replicas > 0 && st.ready_replicas < desired_replicas {
        issues.push(HealthIssue::new(
            IssueType::InsufficientReadyReplicas,
            format!(
                "Only {}/{} replicas are ready after rollout completion",
                st.ready_replicas, desired_replicas
            ),
        ));
    }

    issues
}

fn crash_details(exit_code: Option<i32>, restart_count: Option<i32>) -> IssueDetails {
    IssueDetails {
        exit_code,
        restart_count,
        ..Default::default()
    }
}

fn classify_container(pod: &PodSnapshot, cs: &ContainerSnapshot, issues: &mut Vec<HealthIssue>) {
    let pod_name = pod.name.as_str();
    let mut crash_looping = false;

    match &cs.state {
        ContainerState::Waiting { reason, message } => {
            let reason = reason.as_deref().unwrap_or_default();
            if is_startup_wait(reason) {
                return;
            }
            if let Some(issue_type) = blocking_waiting_issue(reason) {
                issues.push(
                    HealthIssue::new(
                        issue_type,
                        message
                            .clone()
                            .unwrap_or_else(|| format!("Container is waiting: {}", reason)),
                    )
                    .pod(pod_name)
                    .container(&cs.name)
                    .reason(Some(reason)),
                );
            } else if reason == "CrashLoopBackOff" && cs.restart_count > CRASH_LOOP_RESTARTS {
                // Back-off after a clean exit is a restart policy, not a crash
                let last_exit = match &cs.last_state {
                    Some(ContainerState::Terminated { exit_code, .. }) => Some(*exit_code),
                    _ => None,
                };
                if !matches!(last_exit, Some(code) if is_graceful_exit(code)) {
                    crash_looping = true;
                    issues.push(
                        HealthIssue::new(
                            IssueType::CrashLoopBackOff,
                            message
                                .clone()
                                .unwrap_or_else(|| "Container is crash looping".to_string()),
                        )
                        .pod(pod_name)
                        .container(&cs.name)
                        .reason(Some(reason))
                        .details(crash_details(last_exit.flatten(), Some(cs.restart_count))),
                    );
                }
            }
        }
        ContainerState::Terminated {
            reason,
            exit_code,
            message,
        } if !is_graceful_exit(*exit_code) => {
            let exit = exit_code.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string());
            if cs.restart_count > CRASH_LOOP_RESTARTS {
                crash_looping = true;
                issues.push(
                    HealthIssue::new(
                        IssueType::CrashLoopBackOff,
                        message
                            .clone()
                            .unwrap_or_else(|| format!("Container crashed (exit code: {})", exit)),
                    )
                    .pod(pod_name)
                    .container(&cs.name)
                    .reason(reason.as_deref())
                    .details(crash_details(*exit_code, Some(cs.restart_count))),
                );
            } else {
                issues.push(
                    HealthIssue::new(
                        IssueType::ContainerCrash,
                        message
                            .clone()
                            .unwrap_or_else(|| format!("Container exited with code {}", exit)),
                    )
                    .pod(pod_name)
                    .container(&cs.name)
                    .reason(reason.as_deref())
                    .details(crash_details(*exit_code, None)),
                );
            }
        }
        _ => {}
    }

    if let Some(ContainerState::Terminated {
        reason,
        exit_code,
        message,
    }) = &cs.last_state
    {
        if !crash_looping && cs.restart_count > 0 && !is_graceful_exit(*exit_code) {
            let cause = message
                .as_deref()
                .or(reason.as_deref())
                .unwrap_or("unknown");
            issues.push(
                HealthIssue::new(
                    IssueType::PreviousCrash,
                    format!("Container previously crashed: {}", cause),
                )
                .pod(pod_name)
                .container(&cs.name)
                .reason(reason.as_deref())
                .details(crash_details(*exit_code, Some(cs.restart_count))),
            );
        }
    }

    if !cs.ready && pod.phase_is("Running") {
        issues.push(
            HealthIssue::new(IssueType::NotReady, "Container is not ready")
                .pod(pod_name)
                .container(&cs.name),
        );
    }
}

/// Issues for a single pod: phase, scheduling, containers, init containers
pub fn classify_pod(pod: &PodSnapshot) -> Vec<HealthIssue> {
    let mut issues = Vec::new();
    let pod_name = pod.name.as_str();

    if pod.phase_is("Pending") {
        let unschedulable = pod
            .condition(CONDITION_POD_SCHEDULED)
            .filter(|c| c.is_false());
        if let Some(cond) = unschedulable {
            issues.push(
                HealthIssue::new(
                    IssueType::Unschedulable,
                    cond.message
                        .clone()
                        .unwrap_or_else(|| "Pod cannot be scheduled".to_string()),
                )
                .pod(pod_name)
                .reason(cond.reason.as_deref()),
            );
        } else {
            let waiting: Vec<&str> = pod
                .container_statuses
                .iter()
                .filter_map(|cs| cs.state.waiting_reason())
                .filter(|r| !r.is_empty())
                .collect();
            let explained = waiting.iter().any(|r| blocking_waiting_issue(r).is_some());
            let only_starting = waiting.iter().all(|r| is_startup_wait(r));
            // Pending while containers are still being created is normal startup
            if !explained && !only_starting {
                issues.push(HealthIssue::new(IssueType::Pending, "Pod is stuck in Pending state").pod(pod_name));
            }
        }
    } else if pod.phase_is("Failed") {
        issues.push(HealthIssue::new(IssueType::PodFailed, "Pod has failed").pod(pod_name));
    }

    for cs in &pod.container_statuses {
        classify_container(pod, cs, &mut issues);
    }

    for init in &pod.init_container_statuses {
        if let Some(reason) = init.state.waiting_reason().filter(|r| !r.is_empty()) {
            issues.push(
                HealthIssue::new(
                    IssueType::InitContainerWaiting,
                    format!("Init container waiting: {}", reason),
                )
                .pod(pod_name)
                .container(&init.name)
                .reason(Some(reason)),
            );
        }
    }

    issues
}

/// Drop repeated (type, pod, container) issues, keeping the first, and drop
/// `UnavailableReplicas` when a container-specific cause explains it.
pub fn dedupe(issues: Vec<HealthIssue>) -> Vec<HealthIssue> {
    let mut seen = HashSet::new();
    let mut unique: Vec<HealthIssue> = Vec::with_capacity(issues.len());
    for issue in issues {
        let key = (
            issue.issue_type,
            issue.pod_name.clone(),
            issue.container_name.clone(),
        );
        if seen.insert(key) {
            unique.push(issue);
        }
    }

    if unique.iter().any(|i| i.issue_type.is_container_specific()) {
        unique.retain(|i| i.issue_type != IssueType::UnavailableReplicas);
    }
    unique
}

pub fn severity(issues: &[HealthIssue]) -> Severity {
    if issues.is_empty() {
        Severity::Ok
    } else if issues.iter().any(|i| i.issue_type.is_hard_failure()) {
        Severity::Error
    } else {
        Severity::Warning
    }
}

pub fn summary(issues: &[HealthIssue], service_name: &str, desired_replicas: i32, ready_replicas: i32) -> String {
    if issues.is_empty() {
        return format!(
            "{} is healthy: {}/{} replicas ready",
            service_name, ready_replicas, desired_replicas
        );
    }

    let critical = issues.iter().filter(|i| i.issue_type.is_hard_failure()).count();
    if critical > 0 {
        format!(
            "{} has {} critical issue(s) detected after sync",
            service_name, critical
        )
    } else {
        format!("{} has {} issue(s) detected after sync", service_name, issues.len())
    }
}
