//! Core data models for the sync core

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Desired state for a single service, immutable for one sync attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub namespace: String,
    pub service_name: String,
    pub desired_version: String,
    pub desired_pod_count: i32,
}

impl SyncRequest {
    pub fn new(
        namespace: impl Into<String>,
        service_name: impl Into<String>,
        desired_version: impl Into<String>,
        desired_pod_count: i32,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service_name: service_name.into(),
            desired_version: desired_version.into(),
            desired_pod_count,
        }
    }

    /// Reject requests that must never reach the cluster
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(SyncError::InvalidRequest("namespace is required".to_string()));
        }
        if self.service_name.trim().is_empty() {
            return Err(SyncError::InvalidRequest("service name is required".to_string()));
        }
        if self.desired_version.trim().is_empty() {
            return Err(SyncError::InvalidRequest("desired version is required".to_string()));
        }
        if self.desired_pod_count < 0 {
            return Err(SyncError::InvalidRequest(format!(
                "desired pod count must be >= 0, got {}",
                self.desired_pod_count
            )));
        }
        Ok(())
    }
}

/// A value transition applied by a patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change<T> {
    pub from: T,
    pub to: T,
}

/// What a reconcile actually patched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    /// Container whose image was compared
    pub container: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Change<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<Change<i32>>,
}

impl ReconcileOutcome {
    /// Number of patch calls issued
    pub fn patch_count(&self) -> usize {
        usize::from(self.image.is_some()) + usize::from(self.replicas.is_some())
    }

    pub fn is_noop(&self) -> bool {
        self.patch_count() == 0
    }
}

/// Live version and pod count of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentVersion {
    pub name: String,
    pub version: String,
    pub pod_count: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_request() {
        assert!(SyncRequest::new("demo", "api", "1.1.0", 0).validate().is_ok());
    }

    #[test]
    fn test_negative_pod_count_rejected() {
        let err = SyncRequest::new("demo", "api", "1.1.0", -1).validate().unwrap_err();
        assert!(matches!(err, SyncError::InvalidRequest(_)));
    }

    #[test]
    fn test_blank_fields_rejected() {
        assert!(SyncRequest::new("demo", " ", "1.1.0", 1).validate().is_err());
        assert!(SyncRequest::new("demo", "api", "", 1).validate().is_err());
        assert!(SyncRequest::new("", "api", "1", 1).validate().is_err());
    }

    #[test]
    fn test_request_wire_format() {
        let req: SyncRequest = serde_json::from_str(
            r#"{"namespace":"demo","serviceName":"api","desiredVersion":"1.1.0","desiredPodCount":2}"#,
        )
        .unwrap();
        assert_eq!(req, SyncRequest::new("demo", "api", "1.1.0", 2));
    }

    #[test]
    fn test_outcome_patch_count() {
        let outcome = ReconcileOutcome {
            container: "api".to_string(),
            image: Some(Change {
                from: "api:1".to_string(),
                to: "api:2".to_string(),
            }),
            replicas: None,
        };
        assert_eq!(outcome.patch_count(), 1);
        assert!(!outcome.is_noop());
    }
}
