use chrono::{DateTime, Utc};
use pkg_constants::state::SELF_LINK_SEPARATOR;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::status::{State, next_timestamp};

// --- Resource requirements ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ResourceRequirements {
    /// CPU in millicores (1000 = 1 core)
    #[serde(default)]
    pub cpu_millis: u64,
    /// Memory in bytes
    #[serde(default)]
    pub memory_bytes: u64,
}

// --- Container spec ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

// --- Pod spec ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PodSpec {
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub node_affinity: HashMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Toleration {
    pub key: String,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub enum TaintEffect {
    #[default]
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

// --- Pod status ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodStatus {
    pub state: State,
    /// Whether the workload process is up on its node.
    #[serde(default)]
    pub running: bool,
    /// Human-readable reason for the current state (e.g. error message on failure).
    #[serde(default)]
    pub message: String,
}

// --- Pod ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodMeta {
    pub name: String,
    pub namespace: String,
    pub service: String,
    pub deployment: String,
    pub self_link: String,
    /// The node this pod is assigned to (set by scheduler). `None` = unscheduled.
    #[serde(default)]
    pub node: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub meta: PodMeta,
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    /// Build a new, unscheduled pod belonging to the given deployment.
    pub fn new(namespace: &str, service: &str, deployment: &str, name: &str, spec: PodSpec) -> Self {
        let now = Utc::now();
        Self {
            meta: PodMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                service: service.to_string(),
                deployment: deployment.to_string(),
                self_link: Self::self_link_for(namespace, service, deployment, name),
                node: None,
                created: now,
                updated: now,
            },
            spec,
            status: PodStatus::default(),
        }
    }

    pub fn self_link_for(namespace: &str, service: &str, deployment: &str, name: &str) -> String {
        let sep = SELF_LINK_SEPARATOR;
        format!("{namespace}{sep}{service}{sep}{deployment}{sep}{name}")
    }

    pub fn self_link(&self) -> &str {
        &self.meta.self_link
    }

    /// Self-link of the deployment that owns this pod.
    pub fn deployment_link(&self) -> String {
        crate::deployment::Deployment::self_link_for(
            &self.meta.namespace,
            &self.meta.service,
            &self.meta.deployment,
        )
    }

    pub fn touch(&mut self) {
        self.meta.updated = next_timestamp(self.meta.updated);
    }
}

// --- Pod manifest ---

/// Execution manifest published to the node a pod is assigned to.
/// The node agent runs whatever manifests exist under its node id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodManifest {
    pub pod: String,
    pub state: State,
    pub spec: PodSpec,
    pub updated: DateTime<Utc>,
}

impl From<&Pod> for PodManifest {
    fn from(pod: &Pod) -> Self {
        Self {
            pod: pod.meta.self_link.clone(),
            state: pod.status.state,
            spec: pod.spec.clone(),
            updated: pod.meta.updated,
        }
    }
}
