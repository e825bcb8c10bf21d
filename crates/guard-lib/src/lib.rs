//! Core library for guarded rollouts
//!
//! This crate provides:
//! - A small client for the cluster API (deployments, pods, events)
//! - Image reference rewriting and deployment reconciliation
//! - Rollout and terminating-pod waits
//! - Post-sync health inspection with suggested remediation
//! - Batch sync with pause-on-first-alert
//! - Event streaming, metrics and liveness tracking

pub mod batch;
pub mod cluster;
pub mod deployment;
pub mod error;
pub mod events;
pub mod image;
pub mod inspector;
pub mod liveness;
pub mod models;
pub mod observability;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{BatchController, BatchEntry, BatchHandle, BatchOptions, BatchReport, BatchState, BatchStatus};
pub use cluster::{ClusterApi, ClusterClient, ClusterConfig};
pub use error::{BatchError, SyncError};
pub use events::{BroadcastSink, EventSink, EventType, SyncEvent};
pub use inspector::{HealthCheckOptions, HealthInspector, HealthReport, Severity};
pub use liveness::{ComponentHealth, ComponentStatus, LivenessRegistry, LivenessResponse, ReadinessResponse};
pub use models::*;
pub use observability::{GuardMetrics, StructuredLogger};
pub use sync::{SyncOptions, SyncOrchestrator, SyncReport};
