use chrono::{DateTime, Utc};
use pkg_constants::state::SELF_LINK_SEPARATOR;
use serde::{Deserialize, Serialize};

use crate::deployment::{Replicas, Selector, Template};
use crate::status::State;

/// User-declared desired state of a service.
/// Each part carries its own `updated` timestamp for drift detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub template: Template,
    pub selector: Selector,
    pub replicas: Replicas,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub state: State,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMeta {
    pub name: String,
    pub namespace: String,
    pub self_link: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub meta: ServiceMeta,
    pub spec: ServiceSpec,
    #[serde(default)]
    pub status: ServiceStatus,
}

impl Service {
    pub fn new(namespace: &str, name: &str, spec: ServiceSpec) -> Self {
        let now = Utc::now();
        Self {
            meta: ServiceMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                self_link: Self::self_link_for(namespace, name),
                created: now,
                updated: now,
            },
            spec,
            status: ServiceStatus::default(),
        }
    }

    pub fn self_link_for(namespace: &str, name: &str) -> String {
        format!("{namespace}{SELF_LINK_SEPARATOR}{name}")
    }

    pub fn self_link(&self) -> &str {
        &self.meta.self_link
    }
}
