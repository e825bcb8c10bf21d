//! Observability infrastructure for rollout guard
//!
//! Provides:
//! - Prometheus metrics (sync outcomes, health severities, rollout wait time, batches)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::inspector::{HealthReport, Severity};

/// Histogram buckets for rollout wait durations (in seconds)
const ROLLOUT_BUCKETS: &[f64] = &[1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<GuardMetricsInner> = OnceLock::new();

struct GuardMetricsInner {
    syncs_total: IntCounterVec,
    health_reports_total: IntCounterVec,
    rollout_wait_seconds: Histogram,
    batches_total: IntCounterVec,
    batches_active: IntGauge,
    cluster_request_errors: IntCounter,
}

impl GuardMetricsInner {
    fn new() -> Self {
        Self {
            syncs_total: register_int_counter_vec!(
                "rollout_guard_syncs_total",
                "Completed single-service syncs by outcome",
                &["status"]
            )
            .expect("Failed to register syncs_total"),

            health_reports_total: register_int_counter_vec!(
                "rollout_guard_health_reports_total",
                "Post-sync health reports by severity",
                &["severity"]
            )
            .expect("Failed to register health_reports_total"),

            rollout_wait_seconds: register_histogram!(
                "rollout_guard_rollout_wait_seconds",
                "Time spent waiting for a rollout to converge",
                ROLLOUT_BUCKETS.to_vec()
            )
            .expect("Failed to register rollout_wait_seconds"),

            batches_total: register_int_counter_vec!(
                "rollout_guard_batches_total",
                "Finished batches by terminal status",
                &["status"]
            )
            .expect("Failed to register batches_total"),

            batches_active: register_int_gauge!(
                "rollout_guard_batches_active",
                "Batches currently running or paused"
            )
            .expect("Failed to register batches_active"),

            cluster_request_errors: register_int_counter!(
                "rollout_guard_cluster_request_errors_total",
                "Cluster API calls that failed or were rejected"
            )
            .expect("Failed to register cluster_request_errors_total"),
        }
    }
}

/// Rollout guard metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Debug, Clone)]
pub struct GuardMetrics {
    _private: (),
}

impl Default for GuardMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(GuardMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &GuardMetricsInner {
        GLOBAL_METRICS.get_or_init(GuardMetricsInner::new)
    }

    /// Count a finished sync, `status` being "success" or "error"
    pub fn inc_sync(&self, status: &str) {
        self.inner().syncs_total.with_label_values(&[status]).inc();
    }

    pub fn inc_health_report(&self, severity: Severity) {
        self.inner()
            .health_reports_total
            .with_label_values(&[severity.as_str()])
            .inc();
    }

    pub fn observe_rollout_wait(&self, duration_secs: f64) {
        self.inner().rollout_wait_seconds.observe(duration_secs);
    }

    /// Record a batch leaving the active set
    pub fn batch_finished(&self, status: &str) {
        self.inner().batches_total.with_label_values(&[status]).inc();
        self.inner().batches_active.dec();
    }

    pub fn batch_started(&self) {
        self.inner().batches_active.inc();
    }

    pub fn inc_cluster_errors(&self) {
        self.inner().cluster_request_errors.inc();
    }
}

/// Structured logger for sync and batch lifecycle events
///
/// One canonical log line per significant event, keyed by `event`.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, cluster_url: &str) {
        info!(
            event = "guard_started",
            instance = %self.instance,
            version = %version,
            cluster_url = %cluster_url,
            "Rollout guard started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "guard_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Rollout guard shutting down"
        );
    }

    /// Log the terminal outcome of a single-service sync
    pub fn log_sync_complete(
        &self,
        namespace: &str,
        service: &str,
        patches: usize,
        error: Option<&str>,
    ) {
        match error {
            None => info!(
                event = "sync_complete",
                instance = %self.instance,
                namespace = %namespace,
                service = %service,
                patches = patches,
                status = "success",
                "Service synced"
            ),
            Some(error) => warn!(
                event = "sync_complete",
                instance = %self.instance,
                namespace = %namespace,
                service = %service,
                status = "error",
                error = %error,
                "Service sync failed"
            ),
        }
    }

    pub fn log_health_report(&self, report: &HealthReport) {
        let issue_types: Vec<&str> = report.issues.iter().map(|i| i.issue_type.as_str()).collect();
        if report.severity.is_ok() {
            info!(
                event = "health_report",
                instance = %self.instance,
                namespace = %report.namespace,
                service = %report.service_name,
                severity = %report.severity,
                "Post-sync health check passed"
            );
        } else {
            warn!(
                event = "health_report",
                instance = %self.instance,
                namespace = %report.namespace,
                service = %report.service_name,
                severity = %report.severity,
                issues = ?issue_types,
                summary = %report.summary,
                "Post-sync health alert"
            );
        }
    }

    pub fn log_batch_paused(&self, batch_id: &str, service: &str) {
        warn!(
            event = "batch_paused",
            instance = %self.instance,
            batch_id = %batch_id,
            service = %service,
            "Batch paused on first health alert, awaiting operator"
        );
    }

    pub fn log_batch_resumed(&self, batch_id: &str) {
        info!(
            event = "batch_resumed",
            instance = %self.instance,
            batch_id = %batch_id,
            "Batch resumed by operator"
        );
    }

    pub fn log_batch_cancelled(&self, batch_id: &str, processed: usize, total: usize) {
        warn!(
            event = "batch_cancelled",
            instance = %self.instance,
            batch_id = %batch_id,
            processed = processed,
            total = total,
            "Batch cancelled"
        );
    }

    pub fn log_batch_complete(&self, batch_id: &str, total: usize, success: usize, errors: usize) {
        info!(
            event = "batch_complete",
            instance = %self.instance,
            batch_id = %batch_id,
            total = total,
            success_count = success,
            error_count = errors,
            "Batch finished"
        );
    }
}
