//! HTTP API: sync, batch control, event stream, health and metrics

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use guard_lib::{
    batch::{BatchController, BatchEntry, BatchOptions, BatchState},
    cluster::{ClusterApi, ClusterClient, ClusterConfig},
    error::{BatchError, SyncError},
    events::{BroadcastSink, EventSink},
    liveness::{ComponentStatus, LivenessRegistry},
    models::{DeploymentVersion, SyncRequest},
    observability::StructuredLogger,
    sync::{SyncOrchestrator, SyncReport},
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sink: BroadcastSink,
    pub orchestrator: SyncOrchestrator,
    pub batches: BatchController,
    pub liveness: LivenessRegistry,
    pub options: BatchOptions,
    /// Template for clusters named per request
    pub cluster_defaults: ClusterConfig,
    pub logger: StructuredLogger,
}

impl AppState {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        cluster_defaults: ClusterConfig,
        sink: BroadcastSink,
        liveness: LivenessRegistry,
        options: BatchOptions,
        logger: StructuredLogger,
    ) -> Self {
        let events: Arc<dyn EventSink> = Arc::new(sink.clone());
        Self {
            orchestrator: SyncOrchestrator::new(cluster, events.clone()).with_logger(logger.clone()),
            batches: BatchController::new(events).with_logger(logger.clone()),
            sink,
            liveness,
            options,
            cluster_defaults,
            logger,
        }
    }

    /// Orchestrator for the cluster a request names, or the configured one
    fn orchestrator_for(&self, target: &ClusterTarget) -> Result<SyncOrchestrator, ApiError> {
        match (&target.cluster_url, &target.sa_token) {
            (None, None) => Ok(self.orchestrator.clone()),
            (Some(url), Some(token)) => {
                let config = ClusterConfig {
                    api_url: url.clone(),
                    token: token.clone(),
                    ..self.cluster_defaults.clone()
                };
                let client = ClusterClient::new(&config)?;
                let events: Arc<dyn EventSink> = Arc::new(self.sink.clone());
                Ok(SyncOrchestrator::new(Arc::new(client), events).with_logger(self.logger.clone()))
            }
            _ => Err(ApiError::BadRequest(
                "clusterUrl and saToken must be given together".to_string(),
            )),
        }
    }
}

/// Optional per-request cluster override
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTarget {
    pub cluster_url: Option<String>,
    pub sa_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBody {
    #[serde(flatten)]
    pub request: SyncRequest,
    #[serde(flatten)]
    pub target: ClusterTarget,
    /// Overrides the rollout and terminating-pod poll interval
    pub poll_interval_ms: Option<u64>,
    /// Overrides the rollout and terminating-pod timeout
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchBody {
    pub namespace: String,
    #[serde(default)]
    pub services: Vec<BatchEntry>,
    #[serde(flatten)]
    pub target: ClusterTarget,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAccepted {
    pub batch_id: String,
    pub total: usize,
}

/// Errors surfaced to HTTP callers
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Sync(SyncError),
    Batch(BatchError),
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        ApiError::Sync(e)
    }
}

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        ApiError::Batch(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Sync(e) => match e {
                SyncError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                e if e.is_not_found() => StatusCode::NOT_FOUND,
                e if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
            ApiError::Batch(e) => match e {
                BatchError::UnknownBatch(_) => StatusCode::NOT_FOUND,
                BatchError::NotPaused(_)
                | BatchError::NotRunning(_)
                | BatchError::AlreadyRunning { .. } => StatusCode::CONFLICT,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(m) => m.clone(),
            ApiError::Sync(e) => e.to_string(),
            ApiError::Batch(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.message(), "Request failed");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

/// `POST /api/sync`: sync one service and answer with its report.
///
/// The request stays open until the rollout wait and the health check have
/// both finished. With default timeouts that is up to several minutes, so
/// callers need a long client timeout (`rgctl` allows 900s).
async fn sync_service(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SyncBody>,
) -> Result<Json<SyncReport>, ApiError> {
    let orchestrator = state.orchestrator_for(&body.target)?;

    let mut options = state.options.sync;
    if let Some(poll) = body.poll_interval_ms {
        options.rollout.poll_interval = std::time::Duration::from_millis(poll);
        options.terminating.poll_interval = std::time::Duration::from_millis(poll);
    }
    if let Some(timeout) = body.timeout_ms {
        options.rollout.timeout = std::time::Duration::from_millis(timeout);
        options.terminating.timeout = std::time::Duration::from_millis(timeout);
    }

    let report = orchestrator.sync_service(&body.request, &options).await?;
    Ok(Json(report))
}

async fn list_services(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    Query(target): Query<ClusterTarget>,
) -> Result<Json<BTreeMap<String, DeploymentVersion>>, ApiError> {
    let orchestrator = state.orchestrator_for(&target)?;
    let versions = orchestrator.reconciler().list_versions(&namespace).await?;
    Ok(Json(versions))
}

async fn start_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchBody>,
) -> Result<(StatusCode, Json<BatchAccepted>), ApiError> {
    if body.namespace.trim().is_empty() {
        return Err(ApiError::BadRequest("namespace is required".to_string()));
    }
    let orchestrator = state.orchestrator_for(&body.target)?;

    let total = body.services.len();
    let handle = state
        .batches
        .start_batch(orchestrator, &body.namespace, body.services, state.options)?;
    info!(batch_id = %handle.batch_id(), total, "Batch accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchAccepted {
            batch_id: handle.batch_id(),
            total,
        }),
    ))
}

async fn list_batches(State(state): State<Arc<AppState>>) -> Json<Vec<BatchState>> {
    Json(state.batches.active())
}

async fn batch_status(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchState>, ApiError> {
    Ok(Json(state.batches.status(&batch_id)?))
}

async fn resume_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchState>, ApiError> {
    Ok(Json(state.batches.resume(&batch_id)?))
}

async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchState>, ApiError> {
    Ok(Json(state.batches.cancel(&batch_id)?))
}

/// Server-sent events, one per published [`guard_lib::events::SyncEvent`]
async fn event_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.sink.subscribe()).filter_map(|received| {
        // Lagged receivers skip what they missed
        let event = received.ok()?;
        Event::default()
            .event(event.event_type.as_str())
            .json_data(&event)
            .ok()
            .map(Ok)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let liveness = state.liveness.liveness().await;

    let status_code = match liveness.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(liveness))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.liveness.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/sync", post(sync_service))
        .route("/api/services/:namespace", get(list_services))
        .route("/api/batches", post(start_batch).get(list_batches))
        .route("/api/batches/:batch_id", get(batch_status))
        .route("/api/batches/:batch_id/resume", post(resume_batch))
        .route("/api/batches/:batch_id/cancel", post(cancel_batch))
        .route("/api/events", get(event_stream))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
