//! Single-service sync orchestration
//!
//! This module provides:
//! - [`SyncOrchestrator`]: reconcile → rollout wait → terminating-pod wait → health check
//! - [`SyncOptions`]: per-phase poll intervals and timeouts
//! - [`SyncAttempt`] / [`SyncReport`]: captured outcome for batch callers

mod orchestrator;

pub use orchestrator::{SyncAttempt, SyncContext, SyncOptions, SyncOrchestrator, SyncReport};
