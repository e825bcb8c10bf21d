//! Lifecycle events pushed to operators while syncs and batches run
//!
//! Delivery is fire-and-forget: publishing never blocks and never fails,
//! whether or not anyone is listening.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the broadcast channel backing [`BroadcastSink`]
const DEFAULT_CAPACITY: usize = 256;

/// Closed set of event types produced by the sync core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SyncStarted,
    SyncStep,
    PostSyncHealthOk,
    PostSyncHealthAlert,
    SyncComplete,
    BatchSyncStarted,
    BatchSyncPaused,
    BatchSyncCancelled,
    BatchHealthSummary,
    BatchSyncComplete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SyncStarted => "SYNC_STARTED",
            EventType::SyncStep => "SYNC_STEP",
            EventType::PostSyncHealthOk => "POST_SYNC_HEALTH_OK",
            EventType::PostSyncHealthAlert => "POST_SYNC_HEALTH_ALERT",
            EventType::SyncComplete => "SYNC_COMPLETE",
            EventType::BatchSyncStarted => "BATCH_SYNC_STARTED",
            EventType::BatchSyncPaused => "BATCH_SYNC_PAUSED",
            EventType::BatchSyncCancelled => "BATCH_SYNC_CANCELLED",
            EventType::BatchHealthSummary => "BATCH_HEALTH_SUMMARY",
            EventType::BatchSyncComplete => "BATCH_SYNC_COMPLETE",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-phase reported in `SYNC_STEP` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStep {
    PatchingImage,
    PatchingReplicas,
    WaitingForRollout,
    RolloutProgress,
    WaitingForTerminatingPods,
    TerminatingPodsProgress,
    PostSyncHealthCheck,
}

/// A single message on the event sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub event_type: EventType,
    pub data: Value,
}

impl SyncEvent {
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self { event_type, data }
    }

    /// Build a `SYNC_STEP` event, merging `extra` fields into the payload
    pub fn step(namespace: &str, service_name: &str, step: SyncStep, extra: Value) -> Self {
        let mut data = serde_json::json!({
            "namespace": namespace,
            "serviceName": service_name,
            "step": step,
        });
        if let (Some(obj), Value::Object(extra)) = (data.as_object_mut(), extra) {
            obj.extend(extra);
        }
        Self::new(EventType::SyncStep, data)
    }

    /// Step name carried by a `SYNC_STEP` event
    pub fn step_name(&self) -> Option<&str> {
        self.data.get("step").and_then(Value::as_str)
    }
}

/// Destination for lifecycle events
pub trait EventSink: Send + Sync {
    fn publish(&self, event: SyncEvent);
}

/// Event sink backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<SyncEvent>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: SyncEvent) {
        let event_type = event.event_type;
        if self.tx.send(event).is_err() {
            trace!(event_type = %event_type, "No event subscribers, dropping event");
        }
    }
}
