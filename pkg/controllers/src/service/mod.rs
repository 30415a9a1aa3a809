//! Per-service reconciliation: deployment generations, their pods, and
//! rollout cutover between them.

mod backend;
mod deployment;
mod pod;
mod resync;
mod rollout;
mod state;
mod status;
mod store;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{DeploymentStore, PodLifecycle, ServiceHooks};
pub use deployment::deployment_spec_validate;
pub use resync::ServiceResync;
pub use state::{PodBucket, ServiceState};
pub use status::{PodSummary, next_state, service_state};
pub use store::{StoreDeployments, StorePods, StoreServiceHooks};
pub use worker::{Observation, ServiceHandle, ServiceWorker};

use std::sync::Arc;

const LOG_DEPLOYMENT_PREFIX: &str = "state:observer:deployment";
const LOG_POD_PREFIX: &str = "state:observer:pod";
const LOG_SERVICE_PREFIX: &str = "state:observer:service";

/// Drives observed services, deployments and pods toward their desired state.
///
/// Stateless itself; every call takes the `ServiceState` of the service
/// being reconciled.
#[derive(Clone)]
pub struct ServiceController {
    deployments: Arc<dyn DeploymentStore>,
    pods: Arc<dyn PodLifecycle>,
    hooks: Arc<dyn ServiceHooks>,
}

impl ServiceController {
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        pods: Arc<dyn PodLifecycle>,
        hooks: Arc<dyn ServiceHooks>,
    ) -> Self {
        Self {
            deployments,
            pods,
            hooks,
        }
    }
}
