//! Timeout-bounded polling waits on rollout progress and pod termination
//!
//! A failed GET inside a wait is logged and polled again; only a missing
//! deployment ends the wait early. Every other outcome is decided by the
//! timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::events::{SyncEvent, SyncStep};

use super::reconciler::DeploymentReconciler;
use super::snapshot::{DeploymentSnapshot, PodSnapshot, CONDITION_AVAILABLE, CONDITION_PROGRESSING};

/// Poll cadence and overall deadline for a wait loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }
}

impl WaitOptions {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    pub fn from_millis(poll_interval_ms: u64, timeout_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(poll_interval_ms),
            Duration::from_millis(timeout_ms),
        )
    }
}

/// Which pods the terminating-pod wait looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodScope {
    /// Pods matched by service-name label conventions
    #[default]
    Deployment,
    /// Every pod in the namespace
    Namespace,
}

/// Label selectors tried, in order, to find a service's pods
pub fn candidate_selectors(service_name: &str) -> Vec<String> {
    [
        "app",
        "app.kubernetes.io/name",
        "deployment",
        "deploymentconfig",
        "name",
    ]
    .iter()
    .map(|key| format!("{}={}", key, service_name))
    .collect()
}

fn progress_payload(snapshot: &DeploymentSnapshot, desired_replicas: i32) -> serde_json::Value {
    let st = &snapshot.status;
    json!({
        "generation": st.generation,
        "observedGeneration": st.observed_generation,
        "progressingOk": st.condition_true(CONDITION_PROGRESSING),
        "availableOk": st.condition_true(CONDITION_AVAILABLE),
        "replicas": st.replicas,
        "updated": st.updated_replicas,
        "ready": st.ready_replicas,
        "available": st.available_replicas,
        "unavailable": st.unavailable_replicas,
        "desiredReplicas": desired_replicas,
    })
}

impl DeploymentReconciler {
    /// Poll until the rollout converges on `desired_replicas`.
    ///
    /// Fails with [`SyncError::RolloutTimeout`] when the deadline passes.
    pub async fn wait_for_rollout_complete(
        &self,
        namespace: &str,
        name: &str,
        desired_replicas: i32,
        options: WaitOptions,
    ) -> Result<()> {
        let start = Instant::now();
        self.events.publish(SyncEvent::step(
            namespace,
            name,
            SyncStep::WaitingForRollout,
            json!({
                "desiredReplicas": desired_replicas,
                "pollIntervalMs": options.poll_interval.as_millis() as u64,
                "timeoutMs": options.timeout.as_millis() as u64,
            }),
        ));

        let mut last_error: Option<String> = None;
        loop {
            let elapsed = start.elapsed();
            if elapsed > options.timeout {
                warn!(namespace = %namespace, service = %name, elapsed_secs = elapsed.as_secs(), "Rollout timed out");
                return Err(SyncError::RolloutTimeout {
                    name: name.to_string(),
                    elapsed_secs: elapsed.as_secs(),
                    last_error,
                });
            }

            match self.get_snapshot(namespace, name).await {
                Ok(snapshot) => {
                    self.events.publish(SyncEvent::step(
                        namespace,
                        name,
                        SyncStep::RolloutProgress,
                        progress_payload(&snapshot, desired_replicas),
                    ));
                    if snapshot.rollout_complete(desired_replicas) {
                        info!(
                            namespace = %namespace,
                            service = %name,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Rollout complete"
                        );
                        return Ok(());
                    }
                }
                Err(e @ SyncError::DeploymentNotFound { .. }) => return Err(e),
                Err(e) => {
                    warn!(namespace = %namespace, service = %name, error = %e, "Rollout poll failed, retrying");
                    last_error = Some(e.to_string());
                }
            }

            sleep(options.poll_interval).await;
        }
    }

    /// Pods the terminating-pod wait should consider.
    ///
    /// Tries each [`candidate_selectors`] entry and uses the first that
    /// matches anything, otherwise falls back to the whole namespace.
    pub async fn scoped_pods(
        &self,
        namespace: &str,
        name: &str,
        scope: PodScope,
    ) -> Result<Vec<PodSnapshot>> {
        if scope == PodScope::Namespace {
            return self.list_pods(namespace, None).await;
        }

        for selector in candidate_selectors(name) {
            let pods = self.list_pods(namespace, Some(&selector)).await?;
            if !pods.is_empty() {
                debug!(namespace = %namespace, service = %name, selector = %selector, "Matched pods by selector");
                return Ok(pods);
            }
        }

        // Over-approximate rather than wait on nothing
        debug!(namespace = %namespace, service = %name, "No selector matched, scanning namespace");
        self.list_pods(namespace, None).await
    }

    /// Poll until no pod in scope carries a deletion timestamp
    pub async fn wait_for_no_terminating_pods(
        &self,
        namespace: &str,
        name: &str,
        options: WaitOptions,
        scope: PodScope,
    ) -> Result<()> {
        let start = Instant::now();
        self.events.publish(SyncEvent::step(
            namespace,
            name,
            SyncStep::WaitingForTerminatingPods,
            json!({
                "scope": scope,
                "pollIntervalMs": options.poll_interval.as_millis() as u64,
                "timeoutMs": options.timeout.as_millis() as u64,
            }),
        ));

        let mut remaining = 0usize;
        loop {
            let elapsed = start.elapsed();
            if elapsed > options.timeout {
                warn!(namespace = %namespace, service = %name, remaining, "Timed out waiting for terminating pods");
                return Err(SyncError::TerminatingPodsTimeout {
                    name: name.to_string(),
                    remaining,
                    elapsed_secs: elapsed.as_secs(),
                });
            }

            match self.scoped_pods(namespace, name, scope).await {
                Ok(pods) => {
                    let terminating: Vec<&str> = pods
                        .iter()
                        .filter(|p| p.is_terminating())
                        .map(|p| p.name.as_str())
                        .collect();
                    remaining = terminating.len();

                    self.events.publish(SyncEvent::step(
                        namespace,
                        name,
                        SyncStep::TerminatingPodsProgress,
                        json!({"terminating": remaining, "pods": terminating}),
                    ));

                    if remaining == 0 {
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(namespace = %namespace, service = %name, error = %e, "Pod poll failed, retrying");
                }
            }

            sleep(options.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::pods_path;
    use crate::events::BroadcastSink;
    use crate::testing::{deployment_json, pod_json, terminating_pod_json, FakeCluster};
    use serde_json::json;
    use std::sync::Arc;

    const DEPLOYMENT: &str = "/apis/apps/v1/namespaces/demo/deployments/api";

    fn reconciler(cluster: &Arc<FakeCluster>) -> (DeploymentReconciler, BroadcastSink) {
        let sink = BroadcastSink::default();
        (
            DeploymentReconciler::new(cluster.clone(), Arc::new(sink.clone())),
            sink,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollout_wait_returns_once_converged() {
        let cluster = FakeCluster::new();
        cluster.script_get(
            DEPLOYMENT,
            vec![
                deployment_json("api", "api:2", 2, (2, 2), (0, 2, 2), false),
                deployment_json("api", "api:2", 2, (2, 2), (1, 1, 1), false),
                deployment_json("api", "api:2", 2, (2, 2), (2, 2, 2), true),
            ],
        );
        let (reconciler, _sink) = reconciler(&cluster);

        reconciler
            .wait_for_rollout_complete("demo", "api", 2, WaitOptions::default())
            .await
            .unwrap();

        assert_eq!(cluster.get_count(DEPLOYMENT), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollout_wait_ignores_stale_generation() {
        let cluster = FakeCluster::new();
        // Counters look converged, but the controller has not seen generation 5
        cluster.on_get(
            DEPLOYMENT,
            deployment_json("api", "api:2", 2, (5, 4), (2, 2, 2), true),
        );
        let (reconciler, _sink) = reconciler(&cluster);

        let err = reconciler
            .wait_for_rollout_complete(
                "demo",
                "api",
                2,
                WaitOptions::new(Duration::from_secs(2), Duration::from_secs(10)),
            )
            .await
            .unwrap_err();

        match err {
            SyncError::RolloutTimeout { elapsed_secs, .. } => assert!(elapsed_secs >= 10),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollout_wait_tolerates_transient_poll_errors() {
        let cluster = FakeCluster::new();
        cluster.script_get_results(
            DEPLOYMENT,
            vec![
                Err(SyncError::ClusterUnreachable("connection reset".to_string())),
                Ok(deployment_json("api", "api:2", 1, (1, 1), (1, 1, 1), true)),
            ],
        );
        let (reconciler, _sink) = reconciler(&cluster);

        reconciler
            .wait_for_rollout_complete("demo", "api", 1, WaitOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollout_wait_fails_fast_on_missing_deployment() {
        let cluster = FakeCluster::new();
        let (reconciler, _sink) = reconciler(&cluster);

        let err = reconciler
            .wait_for_rollout_complete("demo", "api", 1, WaitOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::DeploymentNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollout_wait_publishes_progress() {
        let cluster = FakeCluster::new();
        cluster.on_get(
            DEPLOYMENT,
            deployment_json("api", "api:2", 2, (2, 2), (2, 2, 2), true),
        );
        let (reconciler, sink) = reconciler(&cluster);
        let mut rx = sink.subscribe();

        reconciler
            .wait_for_rollout_complete("demo", "api", 2, WaitOptions::default())
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().step_name(), Some("WAITING_FOR_ROLLOUT"));
        let progress = rx.recv().await.unwrap();
        assert_eq!(progress.step_name(), Some("ROLLOUT_PROGRESS"));
        assert_eq!(progress.data["updated"], 2);
        assert_eq!(progress.data["availableOk"], true);
    }

    #[test]
    fn test_candidate_selectors_order() {
        let selectors = candidate_selectors("api");
        assert_eq!(selectors[0], "app=api");
        assert_eq!(selectors[1], "app.kubernetes.io/name=api");
        assert_eq!(selectors.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminating_wait_returns_immediately_without_terminating_pods() {
        let cluster = FakeCluster::new();
        cluster.on_get(
            &pods_path("demo", Some("app=api")),
            json!({"items": [pod_json("api-1", "Running", vec![])]}),
        );
        let (reconciler, _sink) = reconciler(&cluster);

        reconciler
            .wait_for_no_terminating_pods("demo", "api", WaitOptions::default(), PodScope::Deployment)
            .await
            .unwrap();

        assert_eq!(cluster.get_count(&pods_path("demo", Some("app=api"))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminating_wait_polls_until_drained() {
        let cluster = FakeCluster::new();
        let path = pods_path("demo", Some("app.kubernetes.io/name=api"));
        cluster.script_get(
            &path,
            vec![
                json!({"items": [pod_json("api-new", "Running", vec![]), terminating_pod_json("api-old")]}),
                json!({"items": [pod_json("api-new", "Running", vec![])]}),
            ],
        );
        let (reconciler, _sink) = reconciler(&cluster);

        reconciler
            .wait_for_no_terminating_pods("demo", "api", WaitOptions::default(), PodScope::Deployment)
            .await
            .unwrap();

        assert_eq!(cluster.get_count(&path), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminating_wait_falls_back_to_namespace() {
        let cluster = FakeCluster::new();
        cluster.on_get(
            &pods_path("demo", None),
            json!({"items": [terminating_pod_json("other-service-1")]}),
        );
        let (reconciler, _sink) = reconciler(&cluster);

        let err = reconciler
            .wait_for_no_terminating_pods(
                "demo",
                "api",
                WaitOptions::new(Duration::from_secs(1), Duration::from_secs(3)),
                PodScope::Deployment,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::TerminatingPodsTimeout { remaining: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_namespace_scope_skips_selectors() {
        let cluster = FakeCluster::new();
        cluster.on_get(&pods_path("demo", None), json!({"items": []}));
        let (reconciler, _sink) = reconciler(&cluster);

        reconciler
            .wait_for_no_terminating_pods("demo", "api", WaitOptions::default(), PodScope::Namespace)
            .await
            .unwrap();

        assert_eq!(cluster.get_count(&pods_path("demo", Some("app=api"))), 0);
        assert_eq!(cluster.get_count(&pods_path("demo", None)), 1);
    }
}
