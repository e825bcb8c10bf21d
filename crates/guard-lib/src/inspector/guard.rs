//! Post-sync health verification loop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Event;
use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::cluster::{decode, events_path, ClusterApi, ObjectList};
use crate::deployment::{DeploymentReconciler, PodScope};
use crate::error::Result;
use crate::events::{EventSink, SyncEvent, SyncStep};

use super::actions::suggested_actions;
use super::classify::{classify_deployment, classify_pod, dedupe, severity, summary};
use super::report::{HealthIssue, HealthReport, IssueEvent};

/// Upper bound on the initial convergence wait
const MAX_CONVERGENCE_WAIT: Duration = Duration::from_secs(120);
/// Pods whose events are fetched per inspection
const EVENT_POD_LIMIT: usize = 10;
/// Events fetched per pod, and kept overall
const EVENT_LIMIT: usize = 20;

/// Most recent timestamp an event carries
fn event_timestamp(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
        .or_else(|| event.first_timestamp.as_ref().map(|t| t.0))
        .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| t.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Pause after convergence before the first inspection
    pub settle_delay: Duration,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
            settle_delay: Duration::from_secs(2),
        }
    }
}

impl HealthCheckOptions {
    pub fn from_millis(poll_interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            ..Default::default()
        }
    }
}

struct Inspection {
    report: HealthReport,
    converged: bool,
}

/// Diagnoses a service's deployment and pods after a sync
#[derive(Clone)]
pub struct HealthInspector {
    cluster: Arc<dyn ClusterApi>,
    events: Arc<dyn EventSink>,
    reconciler: DeploymentReconciler,
}

impl HealthInspector {
    pub fn new(cluster: Arc<dyn ClusterApi>, events: Arc<dyn EventSink>) -> Self {
        let reconciler = DeploymentReconciler::new(cluster.clone(), events.clone());
        Self {
            cluster,
            events,
            reconciler,
        }
    }

    /// Produce a health report for `service_name`.
    ///
    /// Never fails: an inspector error becomes an `error` report, and a
    /// deployment that neither fails nor converges in time yields a
    /// `warning` report.
    pub async fn check_health(
        &self,
        namespace: &str,
        service_name: &str,
        desired_replicas: i32,
        options: HealthCheckOptions,
    ) -> HealthReport {
        let start = Instant::now();
        self.events.publish(SyncEvent::step(
            namespace,
            service_name,
            SyncStep::PostSyncHealthCheck,
            json!({"message": "Starting post-sync health verification"}),
        ));

        let converged = self
            .await_convergence(namespace, service_name, desired_replicas, options)
            .await;

        loop {
            match self.inspect(namespace, service_name, desired_replicas).await {
                Ok(inspection) => {
                    if !inspection.report.issues.is_empty() || converged || inspection.converged {
                        info!(
                            namespace = %namespace,
                            service = %service_name,
                            severity = %inspection.report.severity,
                            issues = inspection.report.issues.len(),
                            "Health check finished"
                        );
                        return inspection.report;
                    }
                    debug!(namespace = %namespace, service = %service_name, "No issues yet, deployment still converging");
                }
                Err(e) => {
                    warn!(namespace = %namespace, service = %service_name, error = %e, "Health check failed");
                    return HealthReport::check_failed(
                        namespace,
                        service_name,
                        &format!("Health check error: {}", e),
                    );
                }
            }

            if start.elapsed() >= options.timeout {
                break;
            }
            sleep(options.poll_interval).await;
        }

        warn!(namespace = %namespace, service = %service_name, "Health check timed out");
        HealthReport::still_stabilizing(namespace, service_name)
    }

    /// Best-effort wait for rollout convergence; never fails
    async fn await_convergence(
        &self,
        namespace: &str,
        service_name: &str,
        desired_replicas: i32,
        options: HealthCheckOptions,
    ) -> bool {
        let start = Instant::now();
        let cap = options.timeout.min(MAX_CONVERGENCE_WAIT);

        while start.elapsed() < cap {
            match self.reconciler.get_snapshot(namespace, service_name).await {
                Ok(snapshot) if snapshot.rollout_complete(desired_replicas) => {
                    sleep(options.settle_delay).await;
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(namespace = %namespace, service = %service_name, error = %e, "Could not read rollout status, inspecting anyway");
                    return false;
                }
            }
            sleep(options.poll_interval).await;
        }
        false
    }

    async fn inspect(&self, namespace: &str, service_name: &str, desired_replicas: i32) -> Result<Inspection> {
        let snapshot = self.reconciler.get_snapshot(namespace, service_name).await?;
        let mut issues = classify_deployment(&snapshot, desired_replicas);

        let pods = match snapshot.label_selector() {
            Some(selector) => self.reconciler.list_pods(namespace, Some(&selector)).await,
            None => {
                self.reconciler
                    .scoped_pods(namespace, service_name, PodScope::Deployment)
                    .await
            }
        };
        match pods {
            Ok(pods) => {
                for pod in &pods {
                    issues.extend(classify_pod(pod));
                }
            }
            Err(e) => {
                warn!(namespace = %namespace, service = %service_name, error = %e, "Failed to list pods, reporting deployment-level issues only");
            }
        }

        let mut issues = dedupe(issues);
        if !issues.is_empty() {
            self.attach_events(namespace, &mut issues).await;
        }

        let report = HealthReport {
            namespace: namespace.to_string(),
            service_name: service_name.to_string(),
            severity: severity(&issues),
            summary: summary(
                &issues,
                service_name,
                desired_replicas,
                snapshot.status.ready_replicas,
            ),
            suggested_actions: suggested_actions(&issues, namespace, service_name),
            issues,
            detected_at: Utc::now(),
        };

        Ok(Inspection {
            report,
            converged: snapshot.rollout_complete(desired_replicas),
        })
    }

    /// Attach recent Warning events to pod-scoped issues
    async fn attach_events(&self, namespace: &str, issues: &mut [HealthIssue]) {
        let mut pods: Vec<&str> = Vec::new();
        for name in issues.iter().filter_map(|i| i.pod_name.as_deref()) {
            if !pods.contains(&name) {
                pods.push(name);
            }
        }
        pods.truncate(EVENT_POD_LIMIT);
        if pods.is_empty() {
            return;
        }

        let mut events: Vec<Event> = Vec::new();
        for pod in pods {
            let fetched = match self.cluster.get(&events_path(namespace, pod, EVENT_LIMIT)).await {
                Ok(value) => decode::<ObjectList<Event>>(value),
                Err(e) => Err(e),
            };
            match fetched {
                Ok(list) => events.extend(list.items),
                Err(e) => warn!(namespace = %namespace, pod = %pod, error = %e, "Failed to fetch pod events"),
            }
        }

        events.sort_by_key(|e| std::cmp::Reverse(event_timestamp(e)));
        events.truncate(EVENT_LIMIT);

        let mut by_pod: HashMap<String, Vec<IssueEvent>> = HashMap::new();
        let warnings = events
            .into_iter()
            .filter(|e| e.type_.as_deref() == Some("Warning"));
        for event in warnings {
            if let Some(pod) = event.involved_object.name.clone() {
                let timestamp = event_timestamp(&event)
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));
                by_pod.entry(pod).or_default().push(IssueEvent {
                    reason: event.reason,
                    message: event.message,
                    timestamp,
                });
            }
        }

        for issue in issues.iter_mut() {
            let pod_events = issue.pod_name.as_ref().and_then(|p| by_pod.get(p));
            if let Some(pod_events) = pod_events {
                issue.details.get_or_insert_with(Default::default).events = pod_events.clone();
            }
        }
    }
}
