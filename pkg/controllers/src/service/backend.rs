use anyhow::Result;
use async_trait::async_trait;
use pkg_types::deployment::Deployment;
use pkg_types::pod::{Pod, PodManifest};
use pkg_types::service::Service;

use super::state::ServiceState;

/// Durable storage for deployment records.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Persist a new deployment generation built from the service's current spec.
    async fn create(&self, service: &Service) -> Result<Deployment>;

    async fn update(&self, deployment: &Deployment) -> Result<()>;

    async fn remove(&self, deployment: &Deployment) -> Result<()>;
}

/// Lifecycle of a single pod and its execution manifest.
#[async_trait]
pub trait PodLifecycle: Send + Sync {
    /// Create (and schedule, if possible) a new pod for the deployment.
    async fn create(&self, deployment: &Deployment) -> Result<Pod>;

    /// Request teardown. On success the pod's state is `Destroy`, or
    /// `Destroyed` when there was nothing running to tear down.
    async fn destroy(&self, pod: &mut Pod) -> Result<()>;

    /// Drop the pod record (and its manifest) from storage.
    async fn remove(&self, pod: &Pod) -> Result<()>;

    /// Fetch the manifest published for `pod` on `node`, if any.
    async fn manifest_get(&self, node: &str, pod: &str) -> Result<Option<PodManifest>>;

    /// Publish the pod's manifest to its assigned node.
    async fn manifest_put(&self, pod: &Pod) -> Result<()>;
}

/// Recomputations that run after every deployment observation.
#[async_trait]
pub trait ServiceHooks: Send + Sync {
    /// Recompute the service's network endpoints.
    async fn endpoint_check(&self, ss: &ServiceState) -> Result<()>;

    /// Recompute the overall service status.
    async fn service_status(&self, ss: &mut ServiceState) -> Result<()>;
}
