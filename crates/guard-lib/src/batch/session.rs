//! Batch sessions and the registry of active batches
//!
//! Each session owns a `watch` channel holding its [`BatchState`]. The batch
//! task and operator commands both mutate it through check-and-set updates,
//! and the pause wait is a `wait_for` on the same channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::BatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Running,
    Paused,
    Cancelled,
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Running => "running",
            BatchStatus::Paused => "paused",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Cancelled | BatchStatus::Completed)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live view of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchState {
    pub batch_id: String,
    pub namespace: String,
    pub status: BatchStatus,
    pub paused_at_service: Option<String>,
    /// Services finished so far, including malformed entries
    pub processed: usize,
    pub total: usize,
}

/// How a pause ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Resumed,
    Cancelled,
}

pub struct BatchSession {
    state: watch::Sender<BatchState>,
    resumed: AtomicBool,
}

impl BatchSession {
    fn new(batch_id: String, namespace: &str, total: usize) -> Self {
        let (state, _) = watch::channel(BatchState {
            batch_id,
            namespace: namespace.to_string(),
            status: BatchStatus::Running,
            paused_at_service: None,
            processed: 0,
            total,
        });
        Self {
            state,
            resumed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> String {
        self.state.borrow().batch_id.clone()
    }

    pub fn namespace(&self) -> String {
        self.state.borrow().namespace.clone()
    }

    pub fn state(&self) -> BatchState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> BatchStatus {
        self.state.borrow().status
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == BatchStatus::Cancelled
    }

    /// An operator resumed this batch at least once
    pub fn was_resumed(&self) -> bool {
        self.resumed.load(Ordering::SeqCst)
    }

    /// Running → Paused; no-op once cancelled
    pub fn pause(&self, service_name: &str) -> bool {
        self.state.send_if_modified(|s| {
            if s.status != BatchStatus::Running {
                return false;
            }
            s.status = BatchStatus::Paused;
            s.paused_at_service = Some(service_name.to_string());
            true
        })
    }

    /// Paused → Running
    pub fn resume(&self) -> Result<BatchState, BatchError> {
        let resumed = self.state.send_if_modified(|s| {
            if s.status != BatchStatus::Paused {
                return false;
            }
            s.status = BatchStatus::Running;
            s.paused_at_service = None;
            true
        });
        if !resumed {
            return Err(BatchError::NotPaused(self.id()));
        }
        self.resumed.store(true, Ordering::SeqCst);
        Ok(self.state())
    }

    /// Running or Paused → Cancelled.
    ///
    /// Repeated cancels are accepted; cancelling a completed batch is not.
    pub fn cancel(&self) -> Result<BatchState, BatchError> {
        let mut completed = false;
        self.state.send_if_modified(|s| match s.status {
            BatchStatus::Running | BatchStatus::Paused => {
                s.status = BatchStatus::Cancelled;
                true
            }
            BatchStatus::Completed => {
                completed = true;
                false
            }
            BatchStatus::Cancelled => false,
        });
        if completed {
            return Err(BatchError::NotRunning(self.id()));
        }
        Ok(self.state())
    }

    /// Block until the batch is no longer paused
    pub async fn wait_while_paused(&self) -> PauseOutcome {
        let mut rx = self.state.subscribe();
        let status = rx
            .wait_for(|s| s.status != BatchStatus::Paused)
            .await
            .map(|s| s.status);
        match status {
            Ok(BatchStatus::Cancelled) | Err(_) => PauseOutcome::Cancelled,
            Ok(_) => PauseOutcome::Resumed,
        }
    }

    pub fn set_processed(&self, processed: usize) {
        self.state.send_modify(|s| s.processed = processed);
    }

    /// Mark a batch that ran out of services as completed
    pub fn complete(&self) -> BatchStatus {
        self.state.send_modify(|s| {
            if !s.status.is_terminal() {
                s.status = BatchStatus::Completed;
            }
            s.paused_at_service = None;
        });
        self.status()
    }
}

/// Active batches keyed by id, at most one per namespace
#[derive(Default)]
pub struct BatchRegistry {
    sessions: DashMap<String, Arc<BatchSession>>,
    by_namespace: DashMap<String, String>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `namespace`, failing if one is already active there
    pub fn register(&self, namespace: &str, total: usize) -> Result<Arc<BatchSession>, BatchError> {
        match self.by_namespace.entry(namespace.to_string()) {
            Entry::Occupied(existing) => Err(BatchError::AlreadyRunning {
                namespace: namespace.to_string(),
                batch_id: existing.get().clone(),
            }),
            Entry::Vacant(slot) => {
                let batch_id = format!("{}-{}", namespace, Utc::now().timestamp_millis());
                let session = Arc::new(BatchSession::new(batch_id.clone(), namespace, total));
                self.sessions.insert(batch_id.clone(), session.clone());
                slot.insert(batch_id);
                Ok(session)
            }
        }
    }

    pub fn get(&self, batch_id: &str) -> Result<Arc<BatchSession>, BatchError> {
        self.sessions
            .get(batch_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| BatchError::UnknownBatch(batch_id.to_string()))
    }

    pub fn list(&self) -> Vec<BatchState> {
        let mut states: Vec<BatchState> = self.sessions.iter().map(|s| s.state()).collect();
        states.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
        states
    }

    pub fn remove(&self, batch_id: &str) {
        if let Some((_, session)) = self.sessions.remove(batch_id) {
            self.by_namespace
                .remove_if(&session.namespace(), |_, id| id == batch_id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
