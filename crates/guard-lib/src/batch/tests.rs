//! Batch controller scenarios against the in-memory cluster

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::*;
use crate::cluster::{deployment_path, pods_path};
use crate::error::BatchError;
use crate::events::{BroadcastSink, EventType, SyncEvent};
use crate::inspector::Severity;
use crate::sync::SyncOrchestrator;
use crate::testing::{container_running, container_terminated, deployment_json, pod_json, FakeCluster};

fn healthy(cluster: &FakeCluster, name: &str) {
    cluster.on_get(
        &deployment_path("demo", name),
        deployment_json(name, &format!("{}:2", name), 1, (1, 1), (1, 1, 1), true),
    );
    cluster.on_get(
        &pods_path("demo", Some(&format!("app={}", name))),
        json!({"items": [pod_json(&format!("{}-1", name), "Running", vec![container_running(name, 0)])]}),
    );
}

fn crash_looping(cluster: &FakeCluster, name: &str) {
    cluster.on_get(
        &deployment_path("demo", name),
        deployment_json(name, &format!("{}:2", name), 1, (1, 1), (1, 1, 1), true),
    );
    cluster.on_get(
        &pods_path("demo", Some(&format!("app={}", name))),
        json!({"items": [pod_json(&format!("{}-1", name), "Running", vec![container_terminated(name, 1, 5)])]}),
    );
}

fn setup() -> (Arc<FakeCluster>, BatchController, SyncOrchestrator, BroadcastSink) {
    let cluster = FakeCluster::new();
    let sink = BroadcastSink::new(4096);
    let events: Arc<dyn crate::events::EventSink> = Arc::new(sink.clone());
    let controller = BatchController::new(events.clone());
    let orchestrator = SyncOrchestrator::new(cluster.clone(), events);
    (cluster, controller, orchestrator, sink)
}

fn entries(names: &[&str]) -> Vec<BatchEntry> {
    names.iter().map(|n| BatchEntry::new(n, "2", 1)).collect()
}

async fn next_of(rx: &mut broadcast::Receiver<SyncEvent>, event_type: EventType) -> SyncEvent {
    loop {
        let event = rx.recv().await.unwrap();
        if event.event_type == event_type {
            return event;
        }
    }
}

fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn of_type(events: &[SyncEvent], event_type: EventType) -> Vec<&SyncEvent> {
    events.iter().filter(|e| e.event_type == event_type).collect()
}

fn service_names(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["serviceName"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_pauses_once_on_first_alert() {
    let (cluster, controller, orchestrator, sink) = setup();
    crash_looping(&cluster, "svc-a");
    healthy(&cluster, "svc-b");
    crash_looping(&cluster, "svc-c");
    let mut rx = sink.subscribe();

    let handle = controller
        .start_batch(orchestrator, "demo", entries(&["svc-a", "svc-b", "svc-c"]), BatchOptions::default())
        .unwrap();
    let batch_id = handle.batch_id();

    let paused = next_of(&mut rx, EventType::BatchSyncPaused).await;
    assert_eq!(paused.data["serviceName"], "svc-a");
    assert_eq!(paused.data["severity"], "error");

    let state = controller.status(&batch_id).unwrap();
    assert_eq!(state.status, BatchStatus::Paused);
    assert_eq!(state.paused_at_service.as_deref(), Some("svc-a"));
    // Nothing after svc-a runs while paused
    assert_eq!(cluster.get_count(&deployment_path("demo", "svc-b")), 0);

    controller.resume(&batch_id).unwrap();
    let report = handle.wait().await.unwrap();

    assert_eq!(report.status, BatchStatus::Completed);
    assert_eq!(report.success_count, 3);
    assert_eq!(report.error_count, 0);
    assert!(report.resumed);
    let failing: Vec<&str> = report.failing_services.iter().map(|f| f.service_name.as_str()).collect();
    assert_eq!(failing, vec!["svc-a", "svc-c"]);

    let events = drain(&mut rx);
    assert!(of_type(&events, EventType::BatchSyncPaused).is_empty());

    let alerts = of_type(&events, EventType::PostSyncHealthAlert);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].data["serviceName"], "svc-c");
    assert_eq!(alerts[0].data["isFirstAlertInBatch"], false);

    let summary = of_type(&events, EventType::BatchHealthSummary);
    assert_eq!(summary.len(), 1);
    assert_eq!(service_names(&summary[0].data["failingServices"]), vec!["svc-a", "svc-c"]);

    let complete = events.last().unwrap();
    assert_eq!(complete.event_type, EventType::BatchSyncComplete);
    assert_eq!(complete.data["total"], 3);
    assert_eq!(complete.data["successCount"], 3);
    assert_eq!(complete.data["errorCount"], 0);

    assert!(controller.active().is_empty());
    assert_eq!(controller.resume(&batch_id), Err(BatchError::UnknownBatch(batch_id.clone())));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_paused_stops_batch() {
    let (cluster, controller, orchestrator, sink) = setup();
    crash_looping(&cluster, "svc-a");
    healthy(&cluster, "svc-b");
    healthy(&cluster, "svc-c");
    let mut rx = sink.subscribe();

    let handle = controller
        .start_batch(orchestrator, "demo", entries(&["svc-a", "svc-b", "svc-c"]), BatchOptions::default())
        .unwrap();
    let batch_id = handle.batch_id();

    next_of(&mut rx, EventType::BatchSyncPaused).await;
    let state = controller.cancel(&batch_id).unwrap();
    assert_eq!(state.status, BatchStatus::Cancelled);

    let report = handle.wait().await.unwrap();
    assert_eq!(report.status, BatchStatus::Cancelled);
    assert_eq!(report.processed, 1);
    assert_eq!(cluster.get_count(&deployment_path("demo", "svc-b")), 0);
    assert_eq!(cluster.get_count(&deployment_path("demo", "svc-c")), 0);

    let events = drain(&mut rx);
    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::BatchSyncCancelled,
            EventType::BatchHealthSummary,
            EventType::BatchSyncComplete,
        ]
    );
    assert_eq!(events[2].data["status"], "cancelled");
    assert_eq!(events[2].data["successCount"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_sync_skips_remaining_services() {
    let (cluster, controller, orchestrator, sink) = setup();
    healthy(&cluster, "svc-a");
    // svc-b would need an image patch if it ever ran
    cluster.on_get(
        &deployment_path("demo", "svc-b"),
        deployment_json("svc-b", "svc-b:1", 1, (1, 1), (1, 1, 1), true),
    );
    let mut rx = sink.subscribe();
    let options = BatchOptions {
        between_services_delay: Duration::from_secs(60),
        ..BatchOptions::default()
    };

    let handle = controller
        .start_batch(orchestrator, "demo", entries(&["svc-a", "svc-b"]), options)
        .unwrap();
    let batch_id = handle.batch_id();

    let started = next_of(&mut rx, EventType::SyncStarted).await;
    assert_eq!(started.data["serviceName"], "svc-a");
    let cancelled_at = Instant::now();
    assert_eq!(controller.cancel(&batch_id).unwrap().status, BatchStatus::Cancelled);

    let report = handle.wait().await.unwrap();
    // The in-flight sync finishes; the delay before the next service is skipped
    assert!(cancelled_at.elapsed() < options.between_services_delay);
    assert_eq!(report.status, BatchStatus::Cancelled);
    assert_eq!(report.processed, 1);
    assert_eq!(report.success_count, 1);
    assert!(cluster.patches().is_empty());
    assert_eq!(cluster.get_count(&deployment_path("demo", "svc-b")), 0);

    let events = drain(&mut rx);
    assert!(of_type(&events, EventType::SyncStarted).is_empty());

    let types: Vec<EventType> = events
        .iter()
        .map(|e| e.event_type)
        .filter(|t| matches!(t, EventType::BatchSyncCancelled | EventType::BatchSyncComplete))
        .collect();
    assert_eq!(types, vec![EventType::BatchSyncCancelled, EventType::BatchSyncComplete]);
    let complete = events.last().unwrap();
    assert_eq!(complete.event_type, EventType::BatchSyncComplete);
    assert_eq!(complete.data["status"], "cancelled");
    assert!(of_type(&events, EventType::BatchHealthSummary).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delay_applies_between_services_only() {
    let (cluster, controller, orchestrator, sink) = setup();
    healthy(&cluster, "svc-a");
    healthy(&cluster, "svc-b");
    let mut rx = sink.subscribe();
    let delay = Duration::from_secs(45);
    let options = BatchOptions {
        between_services_delay: delay,
        ..BatchOptions::default()
    };

    let handle = controller
        .start_batch(orchestrator, "demo", entries(&["svc-a", "svc-b"]), options)
        .unwrap();

    let first = next_of(&mut rx, EventType::SyncComplete).await;
    assert_eq!(first.data["serviceName"], "svc-a");
    let first_done = Instant::now();

    let second = next_of(&mut rx, EventType::SyncStarted).await;
    assert_eq!(second.data["serviceName"], "svc-b");
    let gap = first_done.elapsed();
    assert!(gap >= delay, "gap was {:?}", gap);
    assert!(gap < delay + Duration::from_secs(1), "gap was {:?}", gap);

    let last = next_of(&mut rx, EventType::SyncComplete).await;
    assert_eq!(last.data["serviceName"], "svc-b");
    let last_done = Instant::now();

    next_of(&mut rx, EventType::BatchSyncComplete).await;
    assert!(last_done.elapsed() < Duration::from_secs(1));

    let report = handle.wait().await.unwrap();
    assert_eq!(report.status, BatchStatus::Completed);
    assert_eq!(report.success_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_clean_batch_has_no_summary() {
    let (cluster, controller, orchestrator, sink) = setup();
    healthy(&cluster, "svc-a");
    healthy(&cluster, "svc-b");
    let mut rx = sink.subscribe();

    let handle = controller
        .start_batch(orchestrator, "demo", entries(&["svc-a", "svc-b"]), BatchOptions::default())
        .unwrap();
    let report = handle.wait().await.unwrap();

    assert_eq!(report.status, BatchStatus::Completed);
    assert_eq!(report.success_count, 2);
    assert!(!report.resumed);

    let events = drain(&mut rx);
    assert_eq!(events[0].event_type, EventType::BatchSyncStarted);
    assert_eq!(events[0].data["total"], 2);
    assert!(of_type(&events, EventType::BatchHealthSummary).is_empty());
    assert!(of_type(&events, EventType::BatchSyncPaused).is_empty());
    assert_eq!(of_type(&events, EventType::PostSyncHealthOk).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_entries_fail_without_cluster_calls() {
    let (cluster, controller, orchestrator, sink) = setup();
    healthy(&cluster, "svc-b");
    let mut rx = sink.subscribe();

    let batch: Vec<BatchEntry> = serde_json::from_value(json!([
        {"name": "svc-a", "desiredPodCount": 1},
        {"name": "svc-b", "desiredVersion": "2", "desiredPodCount": 1},
        {"name": "svc-c", "desiredVersion": "2", "desiredPodCount": -1},
        {}
    ]))
    .unwrap();

    let report = controller
        .start_batch(orchestrator, "demo", batch, BatchOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.total, 4);
    assert_eq!(report.success_count, 1);
    assert_eq!(report.error_count, 3);
    assert_eq!(cluster.get_count(&deployment_path("demo", "svc-a")), 0);
    assert_eq!(cluster.get_count(&deployment_path("demo", "svc-c")), 0);

    let events = drain(&mut rx);
    let failures: Vec<&str> = of_type(&events, EventType::SyncComplete)
        .into_iter()
        .filter(|e| e.data["status"] == "error")
        .map(|e| e.data["serviceName"].as_str().unwrap())
        .collect();
    assert_eq!(failures, vec!["svc-a", "svc-c", "unknown"]);
}

#[tokio::test(start_paused = true)]
async fn test_sync_failures_count_as_errors_and_continue() {
    let (cluster, controller, orchestrator, _sink) = setup();
    // svc-a has no deployment
    healthy(&cluster, "svc-b");

    let report = controller
        .start_batch(orchestrator, "demo", entries(&["svc-a", "svc-b"]), BatchOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.status, BatchStatus::Completed);
    assert_eq!(report.success_count, 1);
    assert_eq!(report.error_count, 1);
    assert!(report.failing_services.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_second_batch_in_namespace_is_rejected() {
    let (cluster, controller, orchestrator, _sink) = setup();
    healthy(&cluster, "svc-a");

    let first = controller
        .start_batch(orchestrator.clone(), "demo", entries(&["svc-a"]), BatchOptions::default())
        .unwrap();
    let err = controller
        .start_batch(orchestrator, "demo", entries(&["svc-a"]), BatchOptions::default())
        .err()
        .unwrap();

    assert!(matches!(err, BatchError::AlreadyRunning { .. }));
    assert_eq!(controller.active().len(), 1);
    first.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_resume_of_running_batch_is_rejected() {
    let (cluster, controller, orchestrator, _sink) = setup();
    healthy(&cluster, "svc-a");

    let handle = controller
        .start_batch(orchestrator, "demo", entries(&["svc-a"]), BatchOptions::default())
        .unwrap();
    let batch_id = handle.batch_id();

    assert_eq!(controller.resume(&batch_id), Err(BatchError::NotPaused(batch_id.clone())));
    handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_health_severity_recorded_for_failing_service() {
    let (cluster, controller, orchestrator, sink) = setup();
    crash_looping(&cluster, "svc-a");
    let mut rx = sink.subscribe();

    let handle = controller
        .start_batch(orchestrator, "demo", entries(&["svc-a"]), BatchOptions::default())
        .unwrap();
    next_of(&mut rx, EventType::BatchSyncPaused).await;
    controller.resume(&handle.batch_id()).unwrap();

    let report = handle.wait().await.unwrap();
    assert_eq!(report.failing_services[0].severity, Severity::Error);
}
