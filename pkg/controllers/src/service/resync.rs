use anyhow::Result;
use pkg_constants::state::SERVICES_PREFIX;
use pkg_state::client::StateStore;
use pkg_types::deployment::Deployment;
use pkg_types::pod::Pod;
use pkg_types::service::Service;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::ServiceController;
use super::state::ServiceState;
use super::store::{service_deployments_prefix, service_pods_prefix};
use super::worker::{Observation, ServiceHandle, ServiceWorker};

struct WorkerEntry {
    handle: ServiceHandle,
    join: JoinHandle<ServiceState>,
}

/// Periodically re-reads every service with its deployments and pods from
/// the store and feeds them to one `ServiceWorker` per service.
pub struct ServiceResync {
    store: StateStore,
    controller: ServiceController,
    check_interval: Duration,
    workers: HashMap<String, WorkerEntry>,
    /// Workers whose handle was dropped but which may still be mid-pass.
    stopping: Vec<JoinHandle<ServiceState>>,
}

impl ServiceResync {
    pub fn new(store: StateStore, controller: ServiceController, check_interval: Duration) -> Self {
        Self {
            store,
            controller,
            check_interval,
            workers: HashMap::new(),
            stopping: Vec::new(),
        }
    }

    /// Run until `shutdown` flips (or its sender is dropped), then wait for
    /// every worker to finish its queued observations.
    pub fn start(mut self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "ServiceResync started (interval={}s)",
                self.check_interval.as_secs()
            );
            let mut interval = tokio::time::interval(self.check_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.resync().await {
                            warn!("ServiceResync error: {:#}", e);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            self.stop().await;
            info!("ServiceResync stopped");
        })
    }

    /// One pass over the store.
    async fn resync(&mut self) -> Result<()> {
        let services: Vec<Service> = self.store.list_json(SERVICES_PREFIX).await?;
        let mut seen = HashSet::new();

        for svc in services {
            let link = svc.self_link().to_string();
            seen.insert(link.clone());

            let deployments: Vec<Deployment> = self
                .store
                .list_json(&service_deployments_prefix(&svc))
                .await?;
            let pods: Vec<Pod> = self.store.list_json(&service_pods_prefix(&svc)).await?;

            if !self.workers.contains_key(&link) {
                info!(
                    "ServiceResync: starting worker for {} ({} deployments, {} pods)",
                    link,
                    deployments.len(),
                    pods.len()
                );
                let state = ServiceState::restore(svc.clone(), deployments.clone(), pods.clone());
                let (handle, join) = ServiceWorker::spawn_with(self.controller.clone(), state);
                self.workers.insert(link.clone(), WorkerEntry { handle, join });
            }
            let Some(worker) = self.workers.get(&link) else {
                continue;
            };

            let delivered = deliver(&worker.handle, svc, deployments, pods).await;
            if let Err(e) = delivered {
                warn!("ServiceResync: {:#}, restarting worker", e);
                self.retire(&link);
            }
        }

        let gone: Vec<String> = self
            .workers
            .keys()
            .filter(|link| !seen.contains(*link))
            .cloned()
            .collect();
        for link in gone {
            info!("ServiceResync: service {} is gone, stopping worker", link);
            self.retire(&link);
        }
        self.stopping.retain(|join| !join.is_finished());
        Ok(())
    }

    fn retire(&mut self, link: &str) {
        if let Some(worker) = self.workers.remove(link) {
            self.stopping.push(worker.join);
        }
    }

    /// Drop every handle and wait for the workers to drain their queues.
    async fn stop(&mut self) {
        let running: Vec<JoinHandle<ServiceState>> =
            self.workers.drain().map(|(_, worker)| worker.join).collect();
        for join in self.stopping.drain(..).chain(running) {
            if let Err(e) = join.await {
                warn!("ServiceResync: worker failed: {}", e);
            }
        }
    }
}

/// Service first, then its deployments, then its pods.
async fn deliver(
    handle: &ServiceHandle,
    svc: Service,
    deployments: Vec<Deployment>,
    pods: Vec<Pod>,
) -> Result<()> {
    handle.observe(Observation::Service(svc)).await?;
    for d in deployments {
        handle.observe(Observation::Deployment(d)).await?;
    }
    for p in pods {
        handle.observe(Observation::Pod(p)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::store::{
        StoreDeployments, StorePods, StoreServiceHooks, deployment_key, pod_key, service_key,
    };
    use crate::service::testing::{FakeCluster, deployment, pod, service};
    use pkg_scheduler::Scheduler;
    use pkg_types::status::State;
    use std::sync::Arc;

    fn store_controller(store: &StateStore) -> ServiceController {
        ServiceController::new(
            Arc::new(StoreDeployments::new(store.clone())),
            Arc::new(StorePods::new(store.clone(), Arc::new(Scheduler::new()))),
            Arc::new(StoreServiceHooks::new(store.clone())),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resync_starts_rollout_for_stored_service() {
        let store = StateStore::in_memory().await.unwrap();
        let svc = service(2);
        store.put_json(&service_key(&svc), &svc).await.unwrap();

        let mut resync =
            ServiceResync::new(store.clone(), store_controller(&store), Duration::from_secs(1));
        resync.resync().await.unwrap();
        assert_eq!(resync.workers.len(), 1);
        resync.stop().await;
        assert!(resync.workers.is_empty());

        let stored: Vec<Deployment> = store
            .list_json(&service_deployments_prefix(&svc))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].state(), State::Provision);
        let current: Option<Service> = store.get_json(&service_key(&svc)).await.unwrap();
        assert_eq!(current.unwrap().status.state, State::Provision);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resync_after_restart_keeps_serving_deployment() {
        let store = StateStore::in_memory().await.unwrap();
        let mut svc = service(1);
        svc.status.state = State::Ready;
        let d1 = deployment(&svc, "d1", State::Ready);
        let p1 = pod(&d1, "p1", State::Ready, true);
        store.put_json(&service_key(&svc), &svc).await.unwrap();
        store.put_json(&deployment_key(&d1), &d1).await.unwrap();
        store.put_json(&pod_key(&p1), &p1).await.unwrap();

        let mut resync =
            ServiceResync::new(store.clone(), store_controller(&store), Duration::from_secs(1));
        resync.resync().await.unwrap();
        resync.stop().await;

        let stored: Vec<Deployment> = store
            .list_json(&service_deployments_prefix(&svc))
            .await
            .unwrap();
        let states: Vec<(String, State)> = stored
            .iter()
            .map(|d| (d.meta.name.clone(), d.state()))
            .collect();
        assert_eq!(states, vec![("d1".to_string(), State::Ready)]);
        let pods: Vec<Pod> = store.list_json(&service_pods_prefix(&svc)).await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].self_link(), p1.self_link());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resync_stops_workers_of_removed_services() {
        let store = StateStore::in_memory().await.unwrap();
        let fake = Arc::new(FakeCluster::default());
        let svc = service(1);
        store.put_json(&service_key(&svc), &svc).await.unwrap();

        let mut resync = ServiceResync::new(store.clone(), fake.controller(), Duration::from_secs(1));
        resync.resync().await.unwrap();
        assert_eq!(resync.workers.len(), 1);

        store.delete(&service_key(&svc)).await.unwrap();
        resync.resync().await.unwrap();
        assert!(resync.workers.is_empty());

        resync.stop().await;
        assert!(resync.stopping.is_empty());
        assert_eq!(fake.calls().deployments_created.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_drains_workers_on_shutdown() {
        let store = StateStore::in_memory().await.unwrap();
        let fake = Arc::new(FakeCluster::default());
        let svc = service(3);
        store.put_json(&service_key(&svc), &svc).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let task = ServiceResync::new(store.clone(), fake.controller(), Duration::from_secs(60))
            .start(rx);
        while fake.calls().deployments_created.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        task.await.unwrap();

        // The first pass ran to completion before the task returned.
        assert_eq!(fake.calls().pods_created.len(), 3);
    }
}
