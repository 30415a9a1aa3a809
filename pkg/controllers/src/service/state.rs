use pkg_types::deployment::Deployment;
use pkg_types::pod::Pod;
use pkg_types::service::Service;
use pkg_types::status::State;
use std::collections::{BTreeMap, HashMap};

/// Pods of one deployment, keyed by pod self-link.
pub type PodBucket = BTreeMap<String, Pod>;

#[derive(Debug, Default)]
pub(crate) struct DeploymentSet {
    /// Every deployment not yet fully destroyed, keyed by self-link.
    pub(crate) list: HashMap<String, Deployment>,
    /// Deployment currently serving traffic.
    pub(crate) active: Option<String>,
    /// Deployment currently rolling out. Never equal to `active`.
    pub(crate) provision: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct PodSet {
    /// Known pods per deployment self-link.
    pub(crate) list: HashMap<String, PodBucket>,
}

/// In-memory aggregate for one service.
///
/// Owned by exactly one worker; nothing in here is synchronized, so all
/// observations for a service must be applied through the same owner.
#[derive(Debug)]
pub struct ServiceState {
    pub(crate) service: Service,
    pub(crate) deployment: DeploymentSet,
    pub(crate) pod: PodSet,
}

impl ServiceState {
    pub fn new(service: Service) -> Self {
        Self {
            service,
            deployment: DeploymentSet::default(),
            pod: PodSet::default(),
        }
    }

    /// Rebuild the aggregate from stored records, e.g. after a restart.
    ///
    /// The oldest serving deployment (Ready, else Degradation or Error)
    /// becomes active, so a newer Ready generation still cuts over when it
    /// is observed. The newest Created or Provision deployment other than
    /// the active one becomes the rollout in progress.
    pub fn restore(service: Service, deployments: Vec<Deployment>, pods: Vec<Pod>) -> Self {
        let mut ss = Self::new(service);

        let mut deployments = deployments;
        deployments.sort_by(|a, b| a.meta.created.cmp(&b.meta.created));

        let serving = |states: &[State]| {
            deployments
                .iter()
                .find(|d| states.contains(&d.state()))
                .map(|d| d.self_link().to_string())
        };
        let active = serving(&[State::Ready])
            .or_else(|| serving(&[State::Degradation, State::Error]));
        let provision = deployments
            .iter()
            .rev()
            .filter(|d| matches!(d.state(), State::Created | State::Provision))
            .map(|d| d.self_link().to_string())
            .find(|link| active.as_ref() != Some(link));

        for d in deployments {
            ss.ensure_pod_bucket(d.self_link());
            ss.upsert_deployment(d);
        }
        for p in pods {
            ss.ensure_pod_bucket(&p.deployment_link())
                .insert(p.self_link().to_string(), p);
        }
        if let Some(link) = active {
            ss.set_active(&link);
        }
        if let Some(link) = provision {
            ss.set_provision(&link);
        }
        ss
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut Service {
        &mut self.service
    }

    pub fn deployments(&self) -> impl Iterator<Item = &Deployment> {
        self.deployment.list.values()
    }

    pub fn deployment(&self, link: &str) -> Option<&Deployment> {
        self.deployment.list.get(link)
    }

    pub fn active(&self) -> Option<&Deployment> {
        self.deployment
            .active
            .as_deref()
            .and_then(|link| self.deployment.list.get(link))
    }

    pub fn active_link(&self) -> Option<&str> {
        self.deployment.active.as_deref()
    }

    pub fn provision(&self) -> Option<&Deployment> {
        self.deployment
            .provision
            .as_deref()
            .and_then(|link| self.deployment.list.get(link))
    }

    pub fn provision_link(&self) -> Option<&str> {
        self.deployment.provision.as_deref()
    }

    /// Tracked pods of a deployment, if it has been observed.
    pub fn pods(&self, link: &str) -> Option<&PodBucket> {
        self.pod.list.get(link)
    }

    pub(crate) fn ensure_pod_bucket(&mut self, link: &str) -> &mut PodBucket {
        self.pod.list.entry(link.to_string()).or_default()
    }

    pub(crate) fn upsert_deployment(&mut self, d: Deployment) {
        self.deployment.list.insert(d.self_link().to_string(), d);
    }

    /// Make `link` the serving deployment. Clears the provisioning
    /// reference if it pointed at the same deployment.
    pub(crate) fn set_active(&mut self, link: &str) {
        self.deployment.active = Some(link.to_string());
        self.clear_provision_if(link);
    }

    /// Mark `link` as the rollout in progress. Ignored for the active deployment.
    pub(crate) fn set_provision(&mut self, link: &str) {
        if self.deployment.active.as_deref() == Some(link) {
            return;
        }
        self.deployment.provision = Some(link.to_string());
    }

    pub(crate) fn clear_provision_if(&mut self, link: &str) {
        if self.deployment.provision.as_deref() == Some(link) {
            self.deployment.provision = None;
        }
    }

    /// Forget a deployment entirely, including any reference to it.
    pub(crate) fn del_deployment(&mut self, link: &str) {
        self.deployment.list.remove(link);
        self.pod.list.remove(link);
        if self.deployment.active.as_deref() == Some(link) {
            self.deployment.active = None;
        }
        self.clear_provision_if(link);
    }
}
