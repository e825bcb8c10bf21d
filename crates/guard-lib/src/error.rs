//! Error types for cluster access, reconciliation and batch control

use thiserror::Error;

/// Errors raised while talking to the cluster or converging a deployment
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Transport-level failure (DNS, connect, TLS, read timeout)
    #[error("cluster unreachable: {0}")]
    ClusterUnreachable(String),

    /// The API server answered with a non-2xx status
    #[error("cluster rejected request ({status}): {body}")]
    ClusterRejected { status: u16, body: String },

    #[error("deployment \"{name}\" not found in namespace \"{namespace}\"")]
    DeploymentNotFound { namespace: String, name: String },

    #[error("deployment \"{name}\" has no containers")]
    NoContainers { name: String },

    #[error("rollout timeout for \"{name}\" after {elapsed_secs}s{}", last_error_suffix(.last_error))]
    RolloutTimeout {
        name: String,
        elapsed_secs: u64,
        last_error: Option<String>,
    },

    #[error("timeout waiting for {remaining} terminating pod(s) of \"{name}\" after {elapsed_secs}s")]
    TerminatingPodsTimeout {
        name: String,
        remaining: usize,
        elapsed_secs: u64,
    },

    /// The cluster answered 2xx but the payload could not be decoded
    #[error("invalid cluster response: {0}")]
    InvalidResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last poll error: {})", e),
        None => String::new(),
    }
}

impl SyncError {
    /// True for the expected "did not converge in time" outcomes
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SyncError::RolloutTimeout { .. } | SyncError::TerminatingPodsTimeout { .. }
        )
    }

    /// True when the API server reported the object as missing
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::DeploymentNotFound { .. } | SyncError::ClusterRejected { status: 404, .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors for operator commands against a batch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("batch \"{0}\" is not active")]
    UnknownBatch(String),

    #[error("batch \"{0}\" is not paused")]
    NotPaused(String),

    #[error("batch \"{0}\" has already completed")]
    NotRunning(String),

    #[error("batch \"{batch_id}\" is already running in namespace \"{namespace}\"")]
    AlreadyRunning { namespace: String, batch_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollout_timeout_message_includes_elapsed_seconds() {
        let err = SyncError::RolloutTimeout {
            name: "api".to_string(),
            elapsed_secs: 60,
            last_error: None,
        };
        assert_eq!(err.to_string(), "rollout timeout for \"api\" after 60s");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_rollout_timeout_message_includes_last_poll_error() {
        let err = SyncError::RolloutTimeout {
            name: "api".to_string(),
            elapsed_secs: 5,
            last_error: Some("cluster unreachable: connection refused".to_string()),
        };
        assert!(err.to_string().ends_with("(last poll error: cluster unreachable: connection refused)"));
    }

    #[test]
    fn test_not_found_classification() {
        let rejected = SyncError::ClusterRejected {
            status: 404,
            body: "not found".to_string(),
        };
        assert!(rejected.is_not_found());
        assert!(!SyncError::ClusterUnreachable("dns".to_string()).is_not_found());
    }
}
