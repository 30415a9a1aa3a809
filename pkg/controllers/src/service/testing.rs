//! In-memory collaborators and fixtures for reconciliation tests.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use pkg_types::deployment::{Deployment, Replicas, Selector, Template};
use pkg_types::pod::{Pod, PodManifest, PodSpec};
use pkg_types::service::{Service, ServiceSpec};
use pkg_types::status::State;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::{DeploymentStore, PodLifecycle, ServiceHooks};
use super::state::ServiceState;
use super::ServiceController;

/// Records every collaborator call. Pods created here are scheduled on
/// `node-1` and get a manifest.
#[derive(Default)]
pub(crate) struct FakeCluster {
    inner: Mutex<Calls>,
}

#[derive(Default)]
pub(crate) struct Calls {
    pub deployments_created: Vec<String>,
    pub deployments_updated: Vec<Deployment>,
    pub deployments_removed: Vec<String>,
    pub pods_created: Vec<String>,
    pub pods_destroyed: Vec<String>,
    pub pods_removed: Vec<String>,
    pub manifests: HashSet<String>,
    pub manifest_puts: Vec<String>,
    pub endpoint_checks: usize,
    pub status_checks: usize,
    pub fail_pod_create: bool,
    pub fail_pod_destroy: bool,
    pub fail_pod_remove: bool,
    pub fail_endpoint_check: bool,
    pub fail_service_status: bool,
    seq: usize,
}

impl FakeCluster {
    pub fn calls(&self) -> MutexGuard<'_, Calls> {
        self.inner.lock().unwrap()
    }

    pub fn controller(self: &Arc<Self>) -> ServiceController {
        ServiceController::new(self.clone(), self.clone(), self.clone())
    }

    /// Pretend manifests for these pods already exist on their nodes.
    pub fn publish(&self, pods: &[Pod]) {
        let mut calls = self.calls();
        for p in pods {
            calls.manifests.insert(p.self_link().to_string());
        }
    }
}

#[async_trait]
impl DeploymentStore for FakeCluster {
    async fn create(&self, service: &Service) -> Result<Deployment> {
        let mut calls = self.calls();
        calls.seq += 1;
        let d = Deployment::from_service(service, &format!("gen{}", calls.seq));
        calls.deployments_created.push(d.self_link().to_string());
        Ok(d)
    }

    async fn update(&self, deployment: &Deployment) -> Result<()> {
        self.calls().deployments_updated.push(deployment.clone());
        Ok(())
    }

    async fn remove(&self, deployment: &Deployment) -> Result<()> {
        self.calls()
            .deployments_removed
            .push(deployment.self_link().to_string());
        Ok(())
    }
}

#[async_trait]
impl PodLifecycle for FakeCluster {
    async fn create(&self, deployment: &Deployment) -> Result<Pod> {
        let mut calls = self.calls();
        if calls.fail_pod_create {
            bail!("pod create failed");
        }
        calls.seq += 1;
        let p = pod(deployment, &format!("pod{}", calls.seq), State::Provision, false);
        calls.manifests.insert(p.self_link().to_string());
        calls.pods_created.push(p.self_link().to_string());
        Ok(p)
    }

    async fn destroy(&self, pod: &mut Pod) -> Result<()> {
        let mut calls = self.calls();
        if calls.fail_pod_destroy {
            bail!("pod destroy failed");
        }
        calls.pods_destroyed.push(pod.self_link().to_string());
        pod.status.state = if pod.meta.node.is_some() {
            State::Destroy
        } else {
            State::Destroyed
        };
        pod.touch();
        Ok(())
    }

    async fn remove(&self, pod: &Pod) -> Result<()> {
        let mut calls = self.calls();
        if calls.fail_pod_remove {
            bail!("pod remove failed");
        }
        calls.manifests.remove(pod.self_link());
        calls.pods_removed.push(pod.self_link().to_string());
        Ok(())
    }

    async fn manifest_get(&self, _node: &str, pod: &str) -> Result<Option<PodManifest>> {
        let known = self.calls().manifests.contains(pod);
        Ok(known.then(|| PodManifest {
            pod: pod.to_string(),
            state: State::Provision,
            spec: PodSpec::default(),
            updated: Utc::now(),
        }))
    }

    async fn manifest_put(&self, pod: &Pod) -> Result<()> {
        let mut calls = self.calls();
        calls.manifests.insert(pod.self_link().to_string());
        calls.manifest_puts.push(pod.self_link().to_string());
        Ok(())
    }
}

#[async_trait]
impl ServiceHooks for FakeCluster {
    async fn endpoint_check(&self, _ss: &ServiceState) -> Result<()> {
        let mut calls = self.calls();
        if calls.fail_endpoint_check {
            bail!("endpoint check failed");
        }
        calls.endpoint_checks += 1;
        Ok(())
    }

    async fn service_status(&self, _ss: &mut ServiceState) -> Result<()> {
        let mut calls = self.calls();
        if calls.fail_service_status {
            bail!("service status failed");
        }
        calls.status_checks += 1;
        Ok(())
    }
}

/// Service `default/web`, last edited five minutes ago.
pub(crate) fn service(replicas: u32) -> Service {
    let at = Utc::now() - Duration::minutes(5);
    Service::new(
        "default",
        "web",
        ServiceSpec {
            template: Template {
                spec: PodSpec::default(),
                updated: at,
            },
            selector: Selector {
                labels: HashMap::new(),
                updated: at,
            },
            replicas: Replicas {
                count: replicas,
                updated: at,
            },
        },
    )
}

/// Deployment of `svc` in `state`, last stamped a minute ago.
pub(crate) fn deployment(svc: &Service, name: &str, state: State) -> Deployment {
    let mut d = Deployment::from_service(svc, name);
    d.status.state = state;
    d.meta.updated = Utc::now() - Duration::minutes(1);
    d
}

/// Pod of `d` scheduled on `node-1`.
pub(crate) fn pod(d: &Deployment, name: &str, state: State, running: bool) -> Pod {
    let mut p = Pod::new(
        &d.meta.namespace,
        &d.meta.service,
        &d.meta.name,
        name,
        d.spec.template.spec.clone(),
    );
    p.meta.node = Some("node-1".to_string());
    p.status.state = state;
    p.status.running = running;
    p
}

pub(crate) fn track(ss: &mut ServiceState, pods: Vec<Pod>) {
    for p in pods {
        ss.ensure_pod_bucket(&p.deployment_link())
            .insert(p.self_link().to_string(), p);
    }
}

pub(crate) fn assert_invariants(ss: &ServiceState) {
    if let Some(active) = ss.active_link() {
        assert!(ss.deployment(active).is_some(), "active {active} not tracked");
    }
    if let Some(provision) = ss.provision_link() {
        assert!(
            ss.deployment(provision).is_some(),
            "provision {provision} not tracked"
        );
        assert_ne!(Some(provision), ss.active_link());
    }
}
