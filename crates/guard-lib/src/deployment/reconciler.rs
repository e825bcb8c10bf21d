//! Reads Deployment state and patches image / replica count toward a
//! desired state.
//!
//! The two patches are separate API calls. A failure between them leaves the
//! image patched; since reapplying an identical patch is a no-op, callers
//! recover by simply retrying the whole reconcile.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;

use crate::cluster::{
    decode, deployment_path, deployments_path, pods_path, ClusterApi, ObjectList, PatchOperation,
};
use crate::error::{Result, SyncError};
use crate::events::{EventSink, SyncEvent, SyncStep};
use crate::image;
use crate::models::{Change, DeploymentVersion, ReconcileOutcome, SyncRequest};

use super::snapshot::{DeploymentSnapshot, PodSnapshot};

/// Reconciles a Deployment's image and replica count
#[derive(Clone)]
pub struct DeploymentReconciler {
    pub(super) cluster: Arc<dyn ClusterApi>,
    pub(super) events: Arc<dyn EventSink>,
}

impl DeploymentReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>, events: Arc<dyn EventSink>) -> Self {
        Self { cluster, events }
    }

    fn not_found(err: SyncError, namespace: &str, name: &str) -> SyncError {
        if err.is_not_found() {
            SyncError::DeploymentNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }
        } else {
            err
        }
    }

    /// Fetch a fresh snapshot of a deployment
    pub async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<DeploymentSnapshot> {
        let value = self
            .cluster
            .get(&deployment_path(namespace, name))
            .await
            .map_err(|e| Self::not_found(e, namespace, name))?;
        let deployment: Deployment = decode(value)?;
        Ok(deployment.into())
    }

    /// List pods in a namespace, optionally filtered by label selector
    pub async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<PodSnapshot>> {
        let value = self.cluster.get(&pods_path(namespace, label_selector)).await?;
        let pods: ObjectList<Pod> = decode(value)?;
        Ok(pods.items.into_iter().map(PodSnapshot::from).collect())
    }

    /// Live version and pod count for every deployment in a namespace.
    ///
    /// The version is the tag of the first container's image.
    pub async fn list_versions(&self, namespace: &str) -> Result<BTreeMap<String, DeploymentVersion>> {
        let value = self.cluster.get(&deployments_path(namespace)).await?;
        let deployments: ObjectList<Deployment> = decode(value)?;

        let mut versions = BTreeMap::new();
        for deployment in deployments.items {
            let snapshot = DeploymentSnapshot::from(deployment);
            if snapshot.name.is_empty() {
                continue;
            }
            let version = match snapshot.containers.first() {
                Some(c) if !c.image.is_empty() => image::extract_tag(&c.image),
                _ => "unknown".to_string(),
            };
            versions.insert(
                snapshot.name.clone(),
                DeploymentVersion {
                    name: snapshot.name.clone(),
                    version,
                    pod_count: snapshot.pod_count(),
                },
            );
        }
        Ok(versions)
    }

    async fn patch(&self, namespace: &str, name: &str, op: PatchOperation) -> Result<()> {
        self.cluster
            .patch(&deployment_path(namespace, name), &[op])
            .await
            .map_err(|e| Self::not_found(e, namespace, name))?;
        Ok(())
    }

    /// Patch image and replicas where they differ from the request.
    ///
    /// Issues zero patches when the deployment already matches.
    pub async fn reconcile(&self, request: &SyncRequest) -> Result<ReconcileOutcome> {
        let ns = request.namespace.as_str();
        let name = request.service_name.as_str();

        let snapshot = self.get_snapshot(ns, name).await?;
        if snapshot.containers.is_empty() {
            return Err(SyncError::NoContainers {
                name: name.to_string(),
            });
        }

        let index = match snapshot.container_index(name) {
            Some(index) => index,
            None => {
                warn!(
                    namespace = %ns,
                    service = %name,
                    fallback = %snapshot.containers[0].name,
                    "No container named after the deployment, using the first container"
                );
                0
            }
        };
        let container = &snapshot.containers[index];

        let mut outcome = ReconcileOutcome {
            container: container.name.clone(),
            ..Default::default()
        };

        let desired_image = image::replace_tag(&container.image, &request.desired_version);
        if desired_image != container.image {
            self.events.publish(SyncEvent::step(
                ns,
                name,
                SyncStep::PatchingImage,
                json!({
                    "container": container.name,
                    "from": container.image,
                    "to": desired_image,
                }),
            ));
            self.patch(
                ns,
                name,
                PatchOperation::replace(
                    format!("/spec/template/spec/containers/{}/image", index),
                    desired_image.clone(),
                ),
            )
            .await?;
            info!(namespace = %ns, service = %name, image = %desired_image, "Patched deployment image");
            outcome.image = Some(Change {
                from: container.image.clone(),
                to: desired_image,
            });
        }

        if snapshot.declared_replicas != request.desired_pod_count {
            self.events.publish(SyncEvent::step(
                ns,
                name,
                SyncStep::PatchingReplicas,
                json!({
                    "from": snapshot.declared_replicas,
                    "to": request.desired_pod_count,
                }),
            ));
            self.patch(
                ns,
                name,
                PatchOperation::replace("/spec/replicas", request.desired_pod_count),
            )
            .await?;
            info!(
                namespace = %ns,
                service = %name,
                replicas = request.desired_pod_count,
                "Scaled deployment"
            );
            outcome.replicas = Some(Change {
                from: snapshot.declared_replicas,
                to: request.desired_pod_count,
            });
        }

        Ok(outcome)
    }
}
