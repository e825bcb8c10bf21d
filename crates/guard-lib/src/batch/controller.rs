//! Sequential multi-service sync with pause-on-first-alert

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::BatchError;
use crate::events::{EventSink, EventType, SyncEvent};
use crate::inspector::Severity;
use crate::models::SyncRequest;
use crate::observability::{GuardMetrics, StructuredLogger};
use crate::sync::{SyncContext, SyncOptions, SyncOrchestrator};

use super::session::{BatchRegistry, BatchSession, BatchState, BatchStatus, PauseOutcome};

/// One service in a batch request.
///
/// Every field is optional on the wire so that a malformed entry is
/// recorded as a failure instead of rejecting the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchEntry {
    pub name: Option<String>,
    pub desired_version: Option<String>,
    pub desired_pod_count: Option<i64>,
}

impl BatchEntry {
    pub fn new(name: &str, desired_version: &str, desired_pod_count: i64) -> Self {
        Self {
            name: Some(name.to_string()),
            desired_version: Some(desired_version.to_string()),
            desired_pod_count: Some(desired_pod_count),
        }
    }

    fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("unknown")
    }

    fn to_request(&self, namespace: &str) -> Result<SyncRequest, String> {
        let name = self.name.as_deref().filter(|n| !n.trim().is_empty());
        let version = self.desired_version.as_deref().filter(|v| !v.trim().is_empty());
        match (name, version, self.desired_pod_count) {
            (Some(name), Some(version), Some(count)) => {
                let count = i32::try_from(count)
                    .ok()
                    .filter(|c| *c >= 0)
                    .ok_or_else(|| format!("Invalid desiredPodCount {} for {}", count, name))?;
                Ok(SyncRequest::new(namespace, name, version, count))
            }
            _ => Err("Invalid service payload (missing name/desiredVersion/desiredPodCount)".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub sync: SyncOptions,
    /// Pause between consecutive services
    pub between_services_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            sync: SyncOptions::default(),
            between_services_delay: Duration::from_secs(2),
        }
    }
}

/// A service whose health check ended non-ok
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailingService {
    pub service_name: String,
    pub severity: Severity,
    pub summary: String,
}

/// Final outcome of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: String,
    pub namespace: String,
    pub status: BatchStatus,
    pub total: usize,
    pub processed: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub failing_services: Vec<FailingService>,
    pub resumed: bool,
}

/// Running batch: id plus the task driving it
pub struct BatchHandle {
    session: Arc<BatchSession>,
    task: JoinHandle<BatchReport>,
}

impl BatchHandle {
    pub fn batch_id(&self) -> String {
        self.session.id()
    }

    pub fn state(&self) -> BatchState {
        self.session.state()
    }

    /// Wait for the batch to reach a terminal state
    pub async fn wait(self) -> Result<BatchReport, tokio::task::JoinError> {
        self.task.await
    }
}

/// Starts batches and routes operator commands to them
#[derive(Clone)]
pub struct BatchController {
    registry: Arc<BatchRegistry>,
    events: Arc<dyn EventSink>,
    metrics: GuardMetrics,
    logger: StructuredLogger,
}

impl BatchController {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            registry: Arc::new(BatchRegistry::new()),
            events,
            metrics: GuardMetrics::new(),
            logger: StructuredLogger::new("rollout-guard"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Start syncing `entries` in order on a background task.
    ///
    /// Fails with [`BatchError::AlreadyRunning`] if `namespace` already has
    /// an active batch.
    pub fn start_batch(
        &self,
        orchestrator: SyncOrchestrator,
        namespace: &str,
        entries: Vec<BatchEntry>,
        options: BatchOptions,
    ) -> Result<BatchHandle, BatchError> {
        let session = self.registry.register(namespace, entries.len())?;
        self.metrics.batch_started();
        info!(batch_id = %session.id(), namespace = %namespace, total = entries.len(), "Starting batch sync");

        let run = BatchRun {
            session: session.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
            metrics: self.metrics.clone(),
            logger: self.logger.clone(),
            orchestrator,
            options,
        };
        let task = tokio::spawn(run.execute(entries));

        Ok(BatchHandle { session, task })
    }

    pub fn resume(&self, batch_id: &str) -> Result<BatchState, BatchError> {
        let state = self.registry.get(batch_id)?.resume()?;
        self.logger.log_batch_resumed(batch_id);
        Ok(state)
    }

    /// Request cancellation; takes effect at the next loop boundary
    pub fn cancel(&self, batch_id: &str) -> Result<BatchState, BatchError> {
        self.registry.get(batch_id)?.cancel()
    }

    pub fn status(&self, batch_id: &str) -> Result<BatchState, BatchError> {
        Ok(self.registry.get(batch_id)?.state())
    }

    pub fn active(&self) -> Vec<BatchState> {
        self.registry.list()
    }
}

struct BatchRun {
    session: Arc<BatchSession>,
    registry: Arc<BatchRegistry>,
    events: Arc<dyn EventSink>,
    metrics: GuardMetrics,
    logger: StructuredLogger,
    orchestrator: SyncOrchestrator,
    options: BatchOptions,
}

impl BatchRun {
    async fn execute(self, entries: Vec<BatchEntry>) -> BatchReport {
        let batch_id = self.session.id();
        let namespace = self.session.namespace();
        let total = entries.len();

        self.events.publish(SyncEvent::new(
            EventType::BatchSyncStarted,
            json!({"batchId": batch_id, "namespace": namespace, "total": total}),
        ));

        let mut success_count = 0;
        let mut error_count = 0;
        let mut processed = 0;
        let mut failing_services: Vec<FailingService> = Vec::new();
        let mut alerted = false;

        for (index, entry) in entries.iter().enumerate() {
            if self.session.is_cancelled() {
                break;
            }

            match entry.to_request(&namespace) {
                Err(message) => {
                    error_count += 1;
                    self.events.publish(SyncEvent::new(
                        EventType::SyncComplete,
                        json!({
                            "batchId": batch_id,
                            "namespace": namespace,
                            "serviceName": entry.display_name(),
                            "status": "error",
                            "error": message,
                        }),
                    ));
                }
                Ok(request) => {
                    let ctx = SyncContext::batch(&batch_id, !alerted);
                    let attempt = self
                        .orchestrator
                        .attempt(&request, &self.options.sync, &ctx)
                        .await;
                    if attempt.is_success() {
                        success_count += 1;
                    } else {
                        error_count += 1;
                    }

                    if let Some(report) = attempt.health().filter(|r| !r.severity.is_ok()) {
                        failing_services.push(FailingService {
                            service_name: request.service_name.clone(),
                            severity: report.severity,
                            summary: report.summary.clone(),
                        });

                        if !alerted {
                            alerted = true;
                            if self.session.pause(&request.service_name) {
                                self.logger.log_batch_paused(&batch_id, &request.service_name);
                                self.events.publish(SyncEvent::new(
                                    EventType::BatchSyncPaused,
                                    json!({
                                        "batchId": batch_id,
                                        "namespace": namespace,
                                        "serviceName": request.service_name,
                                        "severity": report.severity,
                                        "summary": report.summary,
                                        "report": report,
                                    }),
                                ));
                                if self.session.wait_while_paused().await == PauseOutcome::Resumed {
                                    debug!(batch_id = %batch_id, "Continuing after resume");
                                }
                            }
                        }
                    }
                }
            }

            processed += 1;
            self.session.set_processed(processed);

            if index + 1 < total && !self.session.is_cancelled() {
                tokio::time::sleep(self.options.between_services_delay).await;
            }
        }

        let status = self.session.complete();
        let resumed = self.session.was_resumed();

        if status == BatchStatus::Cancelled {
            self.logger.log_batch_cancelled(&batch_id, processed, total);
            self.events.publish(SyncEvent::new(
                EventType::BatchSyncCancelled,
                json!({
                    "batchId": batch_id,
                    "namespace": namespace,
                    "processed": processed,
                    "total": total,
                }),
            ));
        }

        if !failing_services.is_empty() || resumed {
            self.events.publish(SyncEvent::new(
                EventType::BatchHealthSummary,
                json!({
                    "batchId": batch_id,
                    "namespace": namespace,
                    "failingServices": failing_services,
                    "hadResume": resumed,
                }),
            ));
        }

        self.events.publish(SyncEvent::new(
            EventType::BatchSyncComplete,
            json!({
                "batchId": batch_id,
                "namespace": namespace,
                "status": status,
                "total": total,
                "successCount": success_count,
                "errorCount": error_count,
            }),
        ));
        self.logger
            .log_batch_complete(&batch_id, total, success_count, error_count);

        self.registry.remove(&batch_id);
        self.metrics.batch_finished(status.as_str());

        BatchReport {
            batch_id,
            namespace,
            status,
            total,
            processed,
            success_count,
            error_count,
            failing_services,
            resumed,
        }
    }
}
