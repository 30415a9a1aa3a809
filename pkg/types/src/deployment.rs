use chrono::{DateTime, Utc};
use pkg_constants::state::SELF_LINK_SEPARATOR;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::pod::PodSpec;
use crate::service::Service;
use crate::status::{State, next_timestamp};

// --- Spec parts ---

/// Workload template. `updated` changes whenever the template is edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub spec: PodSpec,
    pub updated: DateTime<Utc>,
}

/// Label selector for matching pods.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Selector {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub updated: DateTime<Utc>,
}

/// Desired replica count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Replicas {
    pub count: u32,
    pub updated: DateTime<Utc>,
}

// --- Deployment status ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub state: State,
    #[serde(default)]
    pub message: String,
}

// --- Deployment spec ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub template: Template,
    pub selector: Selector,
    pub replicas: Replicas,
}

// --- Deployment ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentMeta {
    pub name: String,
    pub namespace: String,
    pub service: String,
    pub self_link: String,
    pub created: DateTime<Utc>,
    /// Bumped on every status or spec change; drives update-if-dirty persistence.
    pub updated: DateTime<Utc>,
}

/// One rollout generation of a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub meta: DeploymentMeta,
    pub spec: DeploymentSpec,
    #[serde(default)]
    pub status: DeploymentStatus,
}

impl Deployment {
    /// Build a new generation from the service's current spec.
    pub fn from_service(service: &Service, name: &str) -> Self {
        let now = Utc::now();
        let namespace = &service.meta.namespace;
        let svc = &service.meta.name;
        Self {
            meta: DeploymentMeta {
                name: name.to_string(),
                namespace: namespace.clone(),
                service: svc.clone(),
                self_link: Self::self_link_for(namespace, svc, name),
                created: now,
                updated: now,
            },
            spec: DeploymentSpec {
                template: service.spec.template.clone(),
                selector: service.spec.selector.clone(),
                replicas: service.spec.replicas.clone(),
            },
            status: DeploymentStatus::default(),
        }
    }

    pub fn self_link_for(namespace: &str, service: &str, name: &str) -> String {
        let sep = SELF_LINK_SEPARATOR;
        format!("{namespace}{sep}{service}{sep}{name}")
    }

    pub fn self_link(&self) -> &str {
        &self.meta.self_link
    }

    pub fn state(&self) -> State {
        self.status.state
    }

    pub fn replicas(&self) -> u32 {
        self.spec.replicas.count
    }

    /// Advance the update timestamp.
    pub fn touch(&mut self) {
        self.meta.updated = next_timestamp(self.meta.updated);
    }

    /// Set the lifecycle state and message, stamping the update time.
    pub fn set_state(&mut self, state: State, message: impl Into<String>) {
        self.status.state = state;
        self.status.message = message.into();
        self.touch();
    }
}
