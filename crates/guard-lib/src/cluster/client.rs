//! Bearer-token HTTP client for the cluster API
//!
//! Only GET and JSON-patch are needed. No retries happen here: poll loops
//! above decide whether a failed call is worth another attempt.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{Result, SyncError};
use crate::observability::GuardMetrics;

const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// A single RFC 6902 operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: String,
    pub path: String,
    pub value: Value,
}

impl PatchOperation {
    pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: "replace".to_string(),
            path: path.into(),
            value: value.into(),
        }
    }
}

/// Minimal cluster API surface used by the sync core
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// GET a namespace-scoped path (may carry a query string)
    async fn get(&self, path: &str) -> Result<Value>;

    /// Apply a JSON patch to the object at `path`
    async fn patch(&self, path: &str, ops: &[PatchOperation]) -> Result<Value>;
}

/// Decode a JSON payload returned by [`ClusterApi::get`]
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| SyncError::InvalidResponse(e.to_string()))
}

/// Connection settings for [`ClusterClient`]
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// API server base URL (e.g. "https://api.cluster.example:6443")
    pub api_url: String,
    /// Service-account bearer token
    pub token: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Skip TLS verification (self-signed development clusters)
    pub insecure_skip_tls_verify: bool,
}

impl ClusterConfig {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token: token.into(),
            request_timeout: Duration::from_secs(30),
            insecure_skip_tls_verify: false,
        }
    }
}

/// reqwest-backed [`ClusterApi`] implementation
#[derive(Debug, Clone)]
pub struct ClusterClient {
    client: Client,
    base_url: Url,
    token: String,
    metrics: GuardMetrics,
}

impl ClusterClient {
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(|e| SyncError::ClusterUnreachable(format!("failed to build HTTP client: {}", e)))?;

        let base_url = Url::parse(&config.api_url)
            .map_err(|e| SyncError::InvalidRequest(format!("invalid cluster URL {}: {}", config.api_url, e)))?;

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
            metrics: GuardMetrics::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::InvalidRequest(format!("invalid path {}: {}", path, e)))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = match request.bearer_auth(&self.token).send().await {
            Ok(response) => response,
            Err(e) => {
                self.metrics.inc_cluster_errors();
                return Err(SyncError::ClusterUnreachable(e.to_string()));
            }
        };

        let result = Self::read_response(response).await;
        if result.is_err() {
            self.metrics.inc_cluster_errors();
        }
        result
    }

    async fn read_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::ClusterRejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ClusterApi for ClusterClient {
    async fn get(&self, path: &str) -> Result<Value> {
        let url = self.url(path)?;
        debug!(url = %url, "GET");

        self.send(
            self.client
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json"),
        )
        .await
    }

    async fn patch(&self, path: &str, ops: &[PatchOperation]) -> Result<Value> {
        let url = self.url(path)?;
        debug!(url = %url, ops = ops.len(), "PATCH");

        let body = serde_json::to_vec(ops).map_err(|e| SyncError::InvalidRequest(e.to_string()))?;
        self.send(
            self.client
                .patch(url)
                .header(reqwest::header::CONTENT_TYPE, JSON_PATCH_CONTENT_TYPE)
                .body(body),
        )
        .await
    }
}
