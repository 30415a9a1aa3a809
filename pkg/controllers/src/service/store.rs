//! `StateStore`-backed implementations of the reconciliation collaborators.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use pkg_constants::state::{
    DEPLOYMENTS_PREFIX, ENDPOINTS_PREFIX, MANIFESTS_PREFIX, NODES_PREFIX, PODS_PREFIX,
    SERVICES_PREFIX,
};
use pkg_scheduler::Scheduler;
use pkg_state::client::StateStore;
use pkg_types::deployment::Deployment;
use pkg_types::endpoint::{Endpoint, EndpointAddress};
use pkg_types::node::Node;
use pkg_types::pod::{Pod, PodManifest};
use pkg_types::service::Service;
use pkg_types::status::{State, next_timestamp};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::backend::{DeploymentStore, PodLifecycle, ServiceHooks};
use super::state::ServiceState;
use super::status::service_state;

pub(crate) fn service_key(svc: &Service) -> String {
    format!("{}{}/{}", SERVICES_PREFIX, svc.meta.namespace, svc.meta.name)
}

/// Prefix under which all deployments of a service are stored.
pub(crate) fn service_deployments_prefix(svc: &Service) -> String {
    format!("{}{}/{}/", DEPLOYMENTS_PREFIX, svc.meta.namespace, svc.meta.name)
}

/// Prefix under which all pods of a service are stored.
pub(crate) fn service_pods_prefix(svc: &Service) -> String {
    format!("{}{}/{}/", PODS_PREFIX, svc.meta.namespace, svc.meta.name)
}

pub(crate) fn deployment_key(d: &Deployment) -> String {
    format!(
        "{}{}/{}/{}",
        DEPLOYMENTS_PREFIX, d.meta.namespace, d.meta.service, d.meta.name
    )
}

pub(crate) fn pod_key(p: &Pod) -> String {
    format!(
        "{}{}/{}/{}/{}",
        PODS_PREFIX, p.meta.namespace, p.meta.service, p.meta.deployment, p.meta.name
    )
}

fn manifest_key(node: &str, pod: &str) -> String {
    format!("{}{}/{}", MANIFESTS_PREFIX, node, pod)
}

fn endpoint_key(svc: &Service) -> String {
    format!("{}{}/{}", ENDPOINTS_PREFIX, svc.meta.namespace, svc.meta.name)
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ─── Deployments ──────────────────────────────────────────────────────────

pub struct StoreDeployments {
    store: StateStore,
}

impl StoreDeployments {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeploymentStore for StoreDeployments {
    async fn create(&self, service: &Service) -> Result<Deployment> {
        let name = format!("{}-{}", service.meta.name, short_id());
        let d = Deployment::from_service(service, &name);
        self.store.put_json(&deployment_key(&d), &d).await?;
        Ok(d)
    }

    async fn update(&self, deployment: &Deployment) -> Result<()> {
        self.store
            .put_json(&deployment_key(deployment), deployment)
            .await
    }

    async fn remove(&self, deployment: &Deployment) -> Result<()> {
        self.store.delete(&deployment_key(deployment)).await
    }
}

// ─── Pods ─────────────────────────────────────────────────────────────────

/// Pod records plus per-node manifests. Node agents run what is published
/// under their node id and report pod status back into the pod record.
pub struct StorePods {
    store: StateStore,
    scheduler: Arc<Scheduler>,
}

impl StorePods {
    pub fn new(store: StateStore, scheduler: Arc<Scheduler>) -> Self {
        Self { store, scheduler }
    }
}

#[async_trait]
impl PodLifecycle for StorePods {
    async fn create(&self, deployment: &Deployment) -> Result<Pod> {
        let name = format!("{}-{}", deployment.meta.name, short_id());
        let mut pod = Pod::new(
            &deployment.meta.namespace,
            &deployment.meta.service,
            &deployment.meta.name,
            &name,
            deployment.spec.template.spec.clone(),
        );
        pod.status.state = State::Provision;

        let nodes: Vec<Node> = self.store.list_json(NODES_PREFIX).await?;
        pod.meta.node = self.scheduler.schedule(&pod, &nodes);

        self.store.put_json(&pod_key(&pod), &pod).await?;
        if pod.meta.node.is_some() {
            self.manifest_put(&pod).await?;
        }
        Ok(pod)
    }

    async fn destroy(&self, pod: &mut Pod) -> Result<()> {
        // Nothing can be running for a pod that never got a node.
        pod.status.state = match pod.meta.node {
            Some(_) => State::Destroy,
            None => State::Destroyed,
        };
        pod.touch();

        self.store.put_json(&pod_key(pod), pod).await?;
        if pod.meta.node.is_some() {
            self.manifest_put(pod).await?;
        }
        Ok(())
    }

    async fn remove(&self, pod: &Pod) -> Result<()> {
        self.store.delete(&pod_key(pod)).await?;
        if let Some(node) = &pod.meta.node {
            self.store.delete(&manifest_key(node, pod.self_link())).await?;
        }
        Ok(())
    }

    async fn manifest_get(&self, node: &str, pod: &str) -> Result<Option<PodManifest>> {
        self.store.get_json(&manifest_key(node, pod)).await
    }

    async fn manifest_put(&self, pod: &Pod) -> Result<()> {
        let Some(node) = &pod.meta.node else {
            debug!("pod {} is unscheduled, no manifest to publish", pod.self_link());
            return Ok(());
        };
        let manifest = PodManifest::from(pod);
        self.store
            .put_json(&manifest_key(node, pod.self_link()), &manifest)
            .await
    }
}

// ─── Service hooks ────────────────────────────────────────────────────────

/// Writes the service's endpoint record and status back to the store.
pub struct StoreServiceHooks {
    store: StateStore,
}

impl StoreServiceHooks {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

/// Running, scheduled pods of the active deployment.
fn active_addresses(ss: &ServiceState) -> Vec<EndpointAddress> {
    let Some(active) = ss.active_link() else {
        return Vec::new();
    };
    ss.pods(active)
        .into_iter()
        .flat_map(|pods| pods.values())
        .filter(|p| p.status.running && !p.status.state.is_terminating())
        .filter_map(|p| {
            p.meta.node.as_ref().map(|node| EndpointAddress {
                node_id: node.clone(),
                pod: p.self_link().to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl ServiceHooks for StoreServiceHooks {
    async fn endpoint_check(&self, ss: &ServiceState) -> Result<()> {
        let svc = ss.service();
        let key = endpoint_key(svc);
        let deployment = ss.active_link().map(str::to_string);
        let addresses = active_addresses(ss);

        let existing: Option<Endpoint> = self.store.get_json(&key).await?;
        if let Some(existing) = existing
            && existing.deployment == deployment
            && existing.addresses == addresses
        {
            return Ok(());
        }

        info!(
            "Endpoint {}: {} addresses from {}",
            svc.self_link(),
            addresses.len(),
            deployment.as_deref().unwrap_or("<none>")
        );
        let endpoint = Endpoint {
            service: svc.meta.name.clone(),
            namespace: svc.meta.namespace.clone(),
            deployment,
            addresses,
            updated: Utc::now(),
        };
        self.store.put_json(&key, &endpoint).await
    }

    async fn service_status(&self, ss: &mut ServiceState) -> Result<()> {
        let state = service_state(ss);
        let message = match ss.active() {
            Some(d) if state == State::Error => d.status.message.clone(),
            _ => String::new(),
        };

        let svc = ss.service_mut();
        if svc.status.state == state && svc.status.message == message {
            return Ok(());
        }
        info!("Service {}: {} -> {}", svc.self_link(), svc.status.state, state);
        svc.status.state = state;
        svc.status.message = message;
        svc.meta.updated = next_timestamp(svc.meta.updated);

        if state == State::Destroyed {
            self.store.delete(&endpoint_key(svc)).await?;
            return self
                .store
                .delete(&service_key(svc))
                .await
                .with_context(|| format!("remove service {}", svc.self_link()));
        }
        self.store.put_json(&service_key(svc), &*svc).await
    }
}
