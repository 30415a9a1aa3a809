use anyhow::Result;
use pkg_constants::state::SERVICE_QUEUE_CAPACITY;
use pkg_types::deployment::Deployment;
use pkg_types::pod::Pod;
use pkg_types::service::Service;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::ServiceController;
use super::state::ServiceState;

/// A snapshot delivered to a service's worker.
#[derive(Debug, Clone)]
pub enum Observation {
    Service(Service),
    Deployment(Deployment),
    Pod(Pod),
}

/// Sending side of a service worker's queue.
#[derive(Clone)]
pub struct ServiceHandle {
    link: String,
    tx: mpsc::Sender<Observation>,
}

impl ServiceHandle {
    pub fn link(&self) -> &str {
        &self.link
    }

    /// Queue an observation. Fails only if the worker has stopped.
    pub async fn observe(&self, observation: Observation) -> Result<()> {
        self.tx
            .send(observation)
            .await
            .map_err(|_| anyhow::anyhow!("worker for service {} has stopped", self.link))
    }
}

/// Single owner of one service's `ServiceState`. Observations are applied
/// strictly one after another in arrival order.
pub struct ServiceWorker {
    controller: ServiceController,
    state: ServiceState,
    rx: mpsc::Receiver<Observation>,
}

impl ServiceWorker {
    /// Spawn a worker for the service. It runs until every handle is
    /// dropped and then yields its final state.
    pub fn spawn(
        controller: ServiceController,
        service: Service,
    ) -> (ServiceHandle, JoinHandle<ServiceState>) {
        Self::spawn_with(controller, ServiceState::new(service))
    }

    /// Spawn a worker that starts from an already populated state.
    pub fn spawn_with(
        controller: ServiceController,
        state: ServiceState,
    ) -> (ServiceHandle, JoinHandle<ServiceState>) {
        let (tx, rx) = mpsc::channel(SERVICE_QUEUE_CAPACITY);
        let link = state.service().self_link().to_string();
        let worker = Self {
            controller,
            state,
            rx,
        };
        (ServiceHandle { link, tx }, tokio::spawn(worker.run()))
    }

    async fn run(mut self) -> ServiceState {
        let link = self.state.service().self_link().to_string();
        info!("ServiceWorker {} started", link);
        while let Some(observation) = self.rx.recv().await {
            if let Err(e) = self.apply(observation).await {
                warn!("ServiceWorker {} observation error: {:#}", link, e);
            }
        }
        info!("ServiceWorker {} stopped", link);
        self.state
    }

    async fn apply(&mut self, observation: Observation) -> Result<()> {
        match observation {
            Observation::Service(svc) => self.controller.observe_service(&mut self.state, svc).await,
            Observation::Deployment(d) => {
                self.controller.observe_deployment(&mut self.state, d).await
            }
            Observation::Pod(p) => self.controller.observe_pod(&mut self.state, p).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{FakeCluster, assert_invariants, service};
    use pkg_types::status::State;
    use std::sync::Arc;

    #[tokio::test]
    async fn worker_applies_observations_in_order() {
        let fake = Arc::new(FakeCluster::default());
        let svc = service(2);
        let (handle, join) = ServiceWorker::spawn(fake.controller(), svc.clone());

        handle.observe(Observation::Service(svc.clone())).await.unwrap();
        // Redelivery of the same spec must not start a second rollout.
        handle.observe(Observation::Service(svc)).await.unwrap();
        drop(handle);

        let ss = join.await.unwrap();
        let provision = ss.provision().expect("rollout tracked");
        assert_eq!(provision.state(), State::Provision);
        assert_eq!(ss.pods(provision.self_link()).unwrap().len(), 2);
        assert_invariants(&ss);
        assert_eq!(fake.calls().deployments_created.len(), 1);
    }

    #[tokio::test]
    async fn failed_observation_does_not_stop_worker() {
        let fake = Arc::new(FakeCluster::default());
        fake.calls().fail_pod_create = true;
        let svc = service(1);
        let (handle, join) = ServiceWorker::spawn(fake.controller(), svc.clone());

        handle.observe(Observation::Service(svc.clone())).await.unwrap();
        handle.observe(Observation::Service(svc)).await.unwrap();
        drop(handle);

        let ss = join.await.unwrap();
        assert!(ss.provision().is_some());
        assert!(fake.calls().pods_created.is_empty());
    }
}
