//! Single-service sync: reconcile, wait for rollout and terminating pods,
//! then verify health, publishing lifecycle events throughout.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cluster::ClusterApi;
use crate::deployment::{DeploymentReconciler, PodScope, WaitOptions};
use crate::error::{Result, SyncError};
use crate::events::{EventSink, EventType, SyncEvent};
use crate::inspector::{HealthCheckOptions, HealthInspector, HealthReport};
use crate::models::{ReconcileOutcome, SyncRequest};
use crate::observability::{GuardMetrics, StructuredLogger};

/// Poll intervals and timeouts for every wait in a sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub rollout: WaitOptions,
    pub terminating: WaitOptions,
    pub health: HealthCheckOptions,
    pub pod_scope: PodScope,
}

impl SyncOptions {
    /// Health options used to explain a rollout timeout; bounded by the
    /// rollout timeout so a diagnosis never outlasts the wait it explains.
    fn diagnosis(&self) -> HealthCheckOptions {
        HealthCheckOptions {
            timeout: self.health.timeout.min(self.rollout.timeout),
            ..self.health
        }
    }
}

/// Batch membership of a sync, carried into its events
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    pub batch_id: Option<String>,
    /// No alert has been raised yet in the enclosing batch
    pub is_first_alert: bool,
}

impl SyncContext {
    pub fn batch(batch_id: &str, is_first_alert: bool) -> Self {
        Self {
            batch_id: Some(batch_id.to_string()),
            is_first_alert,
        }
    }
}

/// Outcome of a sync that ran to completion
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub changes: ReconcileOutcome,
    pub health: HealthReport,
}

/// Outcome of a sync attempt, successful or not
#[derive(Debug)]
pub struct SyncAttempt {
    pub result: Result<SyncReport>,
    /// Health report explaining a rollout timeout
    pub failure_diagnosis: Option<HealthReport>,
}

impl SyncAttempt {
    /// Health report produced by the attempt, if any
    pub fn health(&self) -> Option<&HealthReport> {
        match &self.result {
            Ok(report) => Some(&report.health),
            Err(_) => self.failure_diagnosis.as_ref(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Composes reconciler and health inspector for one service
#[derive(Clone)]
pub struct SyncOrchestrator {
    reconciler: DeploymentReconciler,
    inspector: HealthInspector,
    events: Arc<dyn EventSink>,
    metrics: GuardMetrics,
    logger: StructuredLogger,
}

impl SyncOrchestrator {
    pub fn new(cluster: Arc<dyn ClusterApi>, events: Arc<dyn EventSink>) -> Self {
        Self {
            reconciler: DeploymentReconciler::new(cluster.clone(), events.clone()),
            inspector: HealthInspector::new(cluster, events.clone()),
            events,
            metrics: GuardMetrics::new(),
            logger: StructuredLogger::new("rollout-guard"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn reconciler(&self) -> &DeploymentReconciler {
        &self.reconciler
    }

    /// Sync one service and propagate any failure after reporting it
    pub async fn sync_service(&self, request: &SyncRequest, options: &SyncOptions) -> Result<SyncReport> {
        self.attempt(request, options, &SyncContext::default())
            .await
            .result
    }

    /// Sync one service, capturing the outcome instead of failing.
    ///
    /// Emits `SYNC_STARTED`, the `SYNC_STEP`s of each phase, a health event
    /// when a health report is produced, and always a final `SYNC_COMPLETE`.
    pub async fn attempt(&self, request: &SyncRequest, options: &SyncOptions, ctx: &SyncContext) -> SyncAttempt {
        let ns = request.namespace.as_str();
        let name = request.service_name.as_str();

        self.events.publish(SyncEvent::new(
            EventType::SyncStarted,
            with_batch(
                json!({
                    "namespace": ns,
                    "serviceName": name,
                    "desiredVersion": request.desired_version,
                    "desiredPodCount": request.desired_pod_count,
                }),
                ctx,
            ),
        ));

        let mut failure_diagnosis = None;
        let result = match request.validate() {
            Ok(()) => self.run(request, options, ctx, &mut failure_diagnosis).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(report) => {
                self.metrics.inc_sync("success");
                self.logger
                    .log_sync_complete(ns, name, report.changes.patch_count(), None);
                self.events.publish(SyncEvent::new(
                    EventType::SyncComplete,
                    with_batch(
                        json!({
                            "namespace": ns,
                            "serviceName": name,
                            "status": "success",
                            "changes": report.changes,
                            "severity": report.health.severity,
                        }),
                        ctx,
                    ),
                ));
            }
            Err(e) => {
                self.metrics.inc_sync("error");
                self.logger
                    .log_sync_complete(ns, name, 0, Some(&e.to_string()));
                self.events.publish(SyncEvent::new(
                    EventType::SyncComplete,
                    with_batch(
                        json!({
                            "namespace": ns,
                            "serviceName": name,
                            "status": "error",
                            "error": e.to_string(),
                        }),
                        ctx,
                    ),
                ));
            }
        }

        SyncAttempt {
            result,
            failure_diagnosis,
        }
    }

    async fn run(
        &self,
        request: &SyncRequest,
        options: &SyncOptions,
        ctx: &SyncContext,
        failure_diagnosis: &mut Option<HealthReport>,
    ) -> Result<SyncReport> {
        let ns = request.namespace.as_str();
        let name = request.service_name.as_str();
        let desired = request.desired_pod_count;

        let changes = self.reconciler.reconcile(request).await?;
        if changes.is_noop() {
            info!(namespace = %ns, service = %name, "Deployment already at desired state");
        }

        let wait_start = Instant::now();
        match self
            .reconciler
            .wait_for_rollout_complete(ns, name, desired, options.rollout)
            .await
        {
            Ok(()) => self
                .metrics
                .observe_rollout_wait(wait_start.elapsed().as_secs_f64()),
            Err(e @ SyncError::RolloutTimeout { .. }) => {
                warn!(namespace = %ns, service = %name, error = %e, "Rollout timed out, diagnosing");
                let report = self
                    .inspector
                    .check_health(ns, name, desired, options.diagnosis())
                    .await;
                self.publish_health(&report, ctx);
                *failure_diagnosis = Some(report);
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        self.reconciler
            .wait_for_no_terminating_pods(ns, name, options.terminating, options.pod_scope)
            .await?;

        let health = self
            .inspector
            .check_health(ns, name, desired, options.health)
            .await;
        self.publish_health(&health, ctx);

        Ok(SyncReport { changes, health })
    }

    fn publish_health(&self, report: &HealthReport, ctx: &SyncContext) {
        self.metrics.inc_health_report(report.severity);
        self.logger.log_health_report(report);

        let (event_type, mut data) = if report.severity.is_ok() {
            (EventType::PostSyncHealthOk, json!({}))
        } else {
            (
                EventType::PostSyncHealthAlert,
                json!({"isFirstAlertInBatch": ctx.is_first_alert}),
            )
        };
        data["namespace"] = json!(report.namespace);
        data["serviceName"] = json!(report.service_name);
        data["report"] = json!(report);
        self.events.publish(SyncEvent::new(event_type, with_batch(data, ctx)));
    }
}

fn with_batch(mut data: Value, ctx: &SyncContext) -> Value {
    if let Some(batch_id) = &ctx.batch_id {
        data["batchId"] = json!(batch_id);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::pods_path;
    use crate::events::BroadcastSink;
    use crate::inspector::{IssueType, Severity};
    use crate::testing::{
        container_running, container_waiting, deployment_json, pod_json, FakeCluster,
    };
    use std::time::Duration;
    use tokio::sync::broadcast;

    const DEPLOYMENT: &str = "/apis/apps/v1/namespaces/demo/deployments/api";

    fn orchestrator(cluster: &Arc<FakeCluster>) -> (SyncOrchestrator, BroadcastSink) {
        let sink = BroadcastSink::new(1024);
        (
            SyncOrchestrator::new(cluster.clone(), Arc::new(sink.clone())),
            sink,
        )
    }

    fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn lifecycle(events: &[SyncEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e.step_name() {
                Some(step) => step.to_string(),
                None => e.event_type.to_string(),
            })
            .collect()
    }

    fn healthy_pods(cluster: &FakeCluster) {
        cluster.on_get(
            &pods_path("demo", Some("app=api")),
            json!({"items": [
                pod_json("api-new-1", "Running", vec![container_running("api", 0)]),
                pod_json("api-new-2", "Running", vec![container_running("api", 0)]),
            ]}),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_image_bump() {
        let cluster = FakeCluster::new();
        cluster.script_get(
            DEPLOYMENT,
            vec![
                // reconcile read
                deployment_json("api", "quay.io/org/api:1.0.0", 2, (1, 1), (2, 2, 2), true),
                // rollout polls
                deployment_json("api", "quay.io/org/api:1.1.0", 2, (2, 2), (0, 2, 2), false),
                deployment_json("api", "quay.io/org/api:1.1.0", 2, (2, 2), (1, 2, 2), false),
                deployment_json("api", "quay.io/org/api:1.1.0", 2, (2, 2), (2, 2, 2), true),
            ],
        );
        healthy_pods(&cluster);
        let (orchestrator, sink) = orchestrator(&cluster);
        let mut rx = sink.subscribe();

        let report = orchestrator
            .sync_service(&SyncRequest::new("demo", "api", "1.1.0", 2), &SyncOptions::default())
            .await
            .unwrap();

        let patches = cluster.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].1[0].path, "/spec/template/spec/containers/0/image");
        assert_eq!(patches[0].1[0].value, json!("quay.io/org/api:1.1.0"));
        assert!(report.changes.replicas.is_none());
        assert_eq!(report.health.severity, Severity::Ok);

        let events = drain(&mut rx);
        let updated: Vec<i64> = events
            .iter()
            .filter(|e| e.step_name() == Some("ROLLOUT_PROGRESS"))
            .map(|e| e.data["updated"].as_i64().unwrap())
            .collect();
        assert_eq!(updated, vec![0, 1, 2]);

        let terminating: Vec<&SyncEvent> = events
            .iter()
            .filter(|e| e.step_name() == Some("TERMINATING_PODS_PROGRESS"))
            .collect();
        assert_eq!(terminating.len(), 1);
        assert_eq!(terminating[0].data["terminating"], 0);

        let phases = lifecycle(&events);
        assert_eq!(phases.first().map(String::as_str), Some("SYNC_STARTED"));
        assert_eq!(phases.last().map(String::as_str), Some("SYNC_COMPLETE"));
        assert!(phases.contains(&"POST_SYNC_HEALTH_OK".to_string()));
        assert_eq!(events.last().unwrap().data["status"], "success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_reported_then_propagated() {
        let cluster = FakeCluster::new();
        let (orchestrator, sink) = orchestrator(&cluster);
        let mut rx = sink.subscribe();

        let err = orchestrator
            .sync_service(&SyncRequest::new("demo", "api", "1.1.0", 2), &SyncOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::DeploymentNotFound { .. }));
        let events = drain(&mut rx);
        assert_eq!(lifecycle(&events), vec!["SYNC_STARTED", "SYNC_COMPLETE"]);
        assert_eq!(events[1].data["status"], "error");
        assert!(events[1].data["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_never_reaches_cluster() {
        let cluster = FakeCluster::new();
        let (orchestrator, _sink) = orchestrator(&cluster);

        let attempt = orchestrator
            .attempt(
                &SyncRequest::new("demo", "api", "", 2),
                &SyncOptions::default(),
                &SyncContext::default(),
            )
            .await;

        assert!(matches!(attempt.result, Err(SyncError::InvalidRequest(_))));
        assert_eq!(cluster.get_count(DEPLOYMENT), 0);
        assert!(attempt.health().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollout_timeout_is_diagnosed() {
        let cluster = FakeCluster::new();
        cluster.script_get(
            DEPLOYMENT,
            vec![
                deployment_json("api", "api:1", 1, (1, 1), (1, 1, 1), true),
                deployment_json("api", "api:2", 1, (2, 2), (1, 0, 0), false),
            ],
        );
        cluster.on_get(
            &pods_path("demo", Some("app=api")),
            json!({"items": [pod_json("api-2", "Pending", vec![container_waiting("api", "ImagePullBackOff", 0)])]}),
        );
        let (orchestrator, sink) = orchestrator(&cluster);
        let mut rx = sink.subscribe();
        let options = SyncOptions {
            rollout: WaitOptions::new(Duration::from_secs(2), Duration::from_secs(10)),
            ..Default::default()
        };

        let attempt = orchestrator
            .attempt(
                &SyncRequest::new("demo", "api", "2", 1),
                &options,
                &SyncContext::batch("demo-1", true),
            )
            .await;

        assert!(matches!(attempt.result, Err(SyncError::RolloutTimeout { .. })));
        let diagnosis = attempt.health().unwrap();
        assert_eq!(diagnosis.severity, Severity::Error);
        assert!(diagnosis.has_issue(IssueType::ImagePullBackOff));

        let events = drain(&mut rx);
        let phases = lifecycle(&events);
        let alert = phases.iter().position(|p| p == "POST_SYNC_HEALTH_ALERT").unwrap();
        let complete = phases.iter().position(|p| p == "SYNC_COMPLETE").unwrap();
        assert!(alert < complete);
        assert_eq!(events[alert].data["batchId"], "demo-1");
        assert_eq!(events[alert].data["isFirstAlertInBatch"], true);
        assert_eq!(events[alert].data["report"]["severity"], "error");
        assert_eq!(events[complete].data["status"], "error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_service_still_syncs_successfully() {
        let cluster = FakeCluster::new();
        cluster.on_get(DEPLOYMENT, deployment_json("api", "api:2", 1, (1, 1), (1, 1, 1), true));
        let mut crashed = container_running("api", 2);
        crashed["lastState"] = json!({"terminated": {"exitCode": 1, "reason": "Error"}});
        cluster.on_get(
            &pods_path("demo", Some("app=api")),
            json!({"items": [pod_json("api-1", "Running", vec![crashed])]}),
        );
        let (orchestrator, sink) = orchestrator(&cluster);
        let mut rx = sink.subscribe();

        let report = orchestrator
            .sync_service(&SyncRequest::new("demo", "api", "2", 1), &SyncOptions::default())
            .await
            .unwrap();

        assert!(report.changes.is_noop());
        assert_eq!(report.health.severity, Severity::Warning);
        let phases = lifecycle(&drain(&mut rx));
        assert!(phases.contains(&"POST_SYNC_HEALTH_ALERT".to_string()));
    }
}
