//! Remediation suggestions keyed off the issue types present in a report

use std::collections::HashSet;

use super::report::{HealthIssue, IssueType, SuggestedAction};

pub fn suggested_actions(issues: &[HealthIssue], namespace: &str, service_name: &str) -> Vec<SuggestedAction> {
    let mut actions = Vec::new();
    if issues.is_empty() {
        return actions;
    }
    let present: HashSet<IssueType> = issues.iter().map(|i| i.issue_type).collect();
    let has = |t: IssueType| present.contains(&t);
    let describe_pods = format!("oc describe pod -l app={} -n {}", service_name, namespace);

    if has(IssueType::ImagePullBackOff) || has(IssueType::ErrImagePull) {
        actions.push(SuggestedAction::new(
            "Check image pull issues",
            "Verify image name, tag, and registry authentication",
            describe_pods.clone(),
        ));
        actions.push(SuggestedAction::new(
            "View image pull events",
            "Check recent events for image pull errors",
            format!(
                "oc get events -n {} --sort-by='.lastTimestamp' | grep -i image",
                namespace
            ),
        ));
        actions.push(SuggestedAction::new(
            "Verify image stream",
            "If the deployment uses an ImageStream, check that it exists and points to the expected image",
            format!("oc get is -n {}", namespace),
        ));
        actions.push(SuggestedAction::new(
            "Check registry pull secret",
            "Verify image pull secrets are configured correctly",
            format!("oc get secret -n {} | grep pull", namespace),
        ));
    }

    if has(IssueType::CrashLoopBackOff) || has(IssueType::ContainerCrash) {
        let container = issues
            .iter()
            .find(|i| matches!(i.issue_type, IssueType::CrashLoopBackOff | IssueType::ContainerCrash))
            .and_then(|i| i.container_name.as_deref())
            .unwrap_or(service_name);
        actions.push(SuggestedAction::new(
            "View container logs",
            "Check logs from the previous run of the crashed container",
            format!(
                "oc logs -l app={} -c {} --previous -n {}",
                service_name, container, namespace
            ),
        ));
        actions.push(SuggestedAction::new(
            "Describe pod for details",
            "Get detailed pod status and events",
            describe_pods.clone(),
        ));
        actions.push(SuggestedAction::new(
            "Check environment variables and config",
            "Verify ConfigMaps, Secrets, and environment variables",
            format!(
                "oc describe deploy/{} -n {} | grep -A 20 \"Environment:\"",
                service_name, namespace
            ),
        ));
    }

    if has(IssueType::Unschedulable) {
        actions.push(SuggestedAction::new(
            "Check pod scheduling constraints",
            "Review resource requests, node selectors, tolerations, and affinity rules",
            format!("{} | grep -A 10 \"Events:\"", describe_pods),
        ));
        actions.push(SuggestedAction::new(
            "Check node resources",
            "Verify nodes have allocatable capacity left",
            "oc describe nodes | grep -A 5 \"Allocated resources\"",
        ));
    }

    if has(IssueType::CreateContainerConfigError) || has(IssueType::RunContainerError) {
        actions.push(SuggestedAction::new(
            "Check container configuration",
            "Verify ConfigMaps, Secrets, and volume mounts",
            describe_pods.clone(),
        ));
    }

    if has(IssueType::ProgressDeadlineExceeded) {
        actions.push(SuggestedAction::new(
            "Check rollout status",
            "The deployment failed to progress within its deadline",
            format!("oc rollout status deploy/{} -n {}", service_name, namespace),
        ));
    }

    actions.push(SuggestedAction::new(
        "View all events",
        "See recent events for this namespace",
        format!(
            "oc get events -n {} --sort-by='.lastTimestamp' | tail -20",
            namespace
        ),
    ));

    actions
}
