//! Cluster API access
//!
//! - [`ClusterApi`]: the GET / JSON-patch seam everything else depends on
//! - [`ClusterClient`]: bearer-token reqwest implementation
//! - path builders for the namespace-scoped endpoints we use
//!
//! Responses are decoded into `k8s_openapi` types.

mod client;

use serde::Deserialize;

pub use client::{decode, ClusterApi, ClusterClient, ClusterConfig, PatchOperation};

/// Items of a list response.
///
/// The API server omits `kind` and `apiVersion` on list items and the list
/// envelope carries nothing we read, so only `items` is decoded.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// `/apis/apps/v1/namespaces/{ns}/deployments`
pub fn deployments_path(namespace: &str) -> String {
    format!("/apis/apps/v1/namespaces/{}/deployments", namespace)
}

/// `/apis/apps/v1/namespaces/{ns}/deployments/{name}`
pub fn deployment_path(namespace: &str, name: &str) -> String {
    format!("{}/{}", deployments_path(namespace), name)
}

/// Pod list path, optionally filtered by a label selector
pub fn pods_path(namespace: &str, label_selector: Option<&str>) -> String {
    let base = format!("/api/v1/namespaces/{}/pods", namespace);
    match label_selector {
        Some(selector) if !selector.is_empty() => {
            format!("{}?labelSelector={}", base, encode_query_value(selector))
        }
        _ => base,
    }
}

/// Warning/normal events attached to a single object
pub fn events_path(namespace: &str, involved_object: &str, limit: usize) -> String {
    format!(
        "/api/v1/namespaces/{}/events?fieldSelector={}&limit={}",
        namespace,
        encode_query_value(&format!("involvedObject.name={}", involved_object)),
        limit
    )
}

fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
