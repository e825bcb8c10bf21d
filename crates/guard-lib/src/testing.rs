//! In-memory cluster and JSON fixtures shared by unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::cluster::{ClusterApi, PatchOperation};
use crate::error::{Result, SyncError};

#[derive(Default)]
struct State {
    responses: HashMap<String, VecDeque<Result<Value>>>,
    gets: HashMap<String, usize>,
    patches: Vec<(String, Vec<PatchOperation>)>,
    patch_failures: HashMap<String, SyncError>,
}

/// Scripted [`ClusterApi`].
///
/// Each path holds a queue of responses; a GET pops the front while more
/// than one remains, so the last scripted response repeats forever. Patches
/// are recorded and applied to every queued response at the patched path.
/// Unscripted pod and event lists are empty; anything else is a 404.
#[derive(Default)]
pub(crate) struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_get(&self, path: &str, value: Value) {
        self.script_get(path, vec![value]);
    }

    pub fn script_get(&self, path: &str, values: Vec<Value>) {
        self.script_get_results(path, values.into_iter().map(Ok).collect());
    }

    pub fn script_get_results(&self, path: &str, results: Vec<Result<Value>>) {
        let mut state = self.state.lock().unwrap();
        state.responses.insert(path.to_string(), results.into());
    }

    pub fn fail_get(&self, path: &str, err: SyncError) {
        self.script_get_results(path, vec![Err(err)]);
    }

    /// Fail every patch touching `json_pointer`
    pub fn fail_patch(&self, json_pointer: &str, err: SyncError) {
        let mut state = self.state.lock().unwrap();
        state.patch_failures.insert(json_pointer.to_string(), err);
    }

    pub fn patches(&self) -> Vec<(String, Vec<PatchOperation>)> {
        self.state.lock().unwrap().patches.clone()
    }

    pub fn get_count(&self, path: &str) -> usize {
        self.state.lock().unwrap().gets.get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get(&self, path: &str) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        *state.gets.entry(path.to_string()).or_default() += 1;

        match state.responses.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ if path.contains("/pods") || path.contains("/events") => Ok(json!({"items": []})),
            _ => Err(SyncError::ClusterRejected {
                status: 404,
                body: format!("{} not found", path),
            }),
        }
    }

    async fn patch(&self, path: &str, ops: &[PatchOperation]) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        for op in ops {
            if let Some(err) = state.patch_failures.get(&op.path) {
                return Err(err.clone());
            }
        }
        state.patches.push((path.to_string(), ops.to_vec()));

        if let Some(queue) = state.responses.get_mut(path) {
            for value in queue.iter_mut().flatten() {
                for op in ops {
                    if let Some(target) = value.pointer_mut(&op.path) {
                        *target = op.value.clone();
                    }
                }
            }
        }
        Ok(json!({}))
    }
}

/// Deployment JSON with one container named after the deployment.
///
/// `generations` is `(generation, observedGeneration)` and `counters` is
/// `(updated, available, ready)`.
pub(crate) fn deployment_json(
    name: &str,
    image: &str,
    replicas: i32,
    generations: (i64, i64),
    counters: (i32, i32, i32),
    available: bool,
) -> Value {
    let (generation, observed) = generations;
    let (updated, available_replicas, ready) = counters;
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "generation": generation, "labels": {"app": name}},
        "spec": {
            "replicas": replicas,
            "selector": {"matchLabels": {"app": name}},
            "template": {
                "metadata": {"labels": {"app": name}},
                "spec": {"containers": [{"name": name, "image": image}]}
            }
        },
        "status": {
            "observedGeneration": observed,
            "replicas": replicas,
            "updatedReplicas": updated,
            "availableReplicas": available_replicas,
            "readyReplicas": ready,
            "unavailableReplicas": (replicas - available_replicas).max(0),
            "conditions": [
                {"type": "Available", "status": if available { "True" } else { "False" }},
                {"type": "Progressing", "status": "True", "reason": "NewReplicaSetAvailable"}
            ]
        }
    })
}

pub(crate) fn pod_json(name: &str, phase: &str, containers: Vec<Value>) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "labels": {"app": "api"}},
        "status": {"phase": phase, "containerStatuses": containers}
    })
}

pub(crate) fn terminating_pod_json(name: &str) -> Value {
    let mut pod = pod_json(name, "Running", vec![]);
    pod["metadata"]["deletionTimestamp"] = json!("2024-05-01T10:00:00Z");
    pod
}

pub(crate) fn container_running(name: &str, restart_count: i32) -> Value {
    json!({
        "name": name,
        "image": format!("{}:latest", name),
        "imageID": "",
        "ready": true,
        "restartCount": restart_count,
        "state": {"running": {"startedAt": "2024-05-01T10:00:00Z"}}
    })
}

pub(crate) fn container_waiting(name: &str, reason: &str, restart_count: i32) -> Value {
    json!({
        "name": name,
        "image": format!("{}:latest", name),
        "imageID": "",
        "ready": false,
        "restartCount": restart_count,
        "state": {"waiting": {"reason": reason, "message": format!("{} message", reason)}}
    })
}

pub(crate) fn container_terminated(name: &str, exit_code: i32, restart_count: i32) -> Value {
    json!({
        "name": name,
        "image": format!("{}:latest", name),
        "imageID": "",
        "ready": false,
        "restartCount": restart_count,
        "state": {"terminated": {"exitCode": exit_code, "reason": "Error"}}
    })
}

/// Warning event attached to `pod`
pub(crate) fn warning_event_json(pod: &str, reason: &str, last_timestamp: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Event",
        "metadata": {"name": format!("{}.{}", pod, reason)},
        "involvedObject": {"kind": "Pod", "name": pod},
        "type": "Warning",
        "reason": reason,
        "message": format!("{} for {}", reason, pod),
        "lastTimestamp": last_timestamp,
        "count": 1
    })
}
