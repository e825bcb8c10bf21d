//! Deployment reconciliation and rollout waits

mod reconciler;
pub mod snapshot;
mod wait;

pub use reconciler::DeploymentReconciler;
pub use snapshot::{
    Condition, ContainerRef, ContainerSnapshot, ContainerState, DeploymentSnapshot, PodSnapshot,
    RolloutStatus,
};
pub use wait::{candidate_selectors, PodScope, WaitOptions};
