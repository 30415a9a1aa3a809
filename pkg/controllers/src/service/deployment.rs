use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pkg_types::deployment::{Deployment, Replicas};
use pkg_types::pod::Pod;
use pkg_types::service::Service;
use pkg_types::status::State;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use super::state::{PodBucket, ServiceState};
use super::status::{PodSummary, next_state};
use super::{LOG_DEPLOYMENT_PREFIX, ServiceController};

/// Scale-down order: least progressed / least healthy pods go first.
const DESTROY_PRIORITY: [State; 5] = [
    State::Error,
    State::Warning,
    State::Created,
    State::Provision,
    State::Ready,
];

/// Live states outside the priority list, tried in this order.
const DESTROY_FALLBACK: [State; 1] = [State::Degradation];

impl ServiceController {
    /// Apply one observed deployment snapshot to the service state.
    ///
    /// Any error aborts the pass; the same (or a fresher) snapshot can be
    /// delivered again to make progress.
    pub async fn observe_deployment(&self, ss: &mut ServiceState, mut d: Deployment) -> Result<()> {
        debug!(
            "{}:> observe start: {} > {}",
            LOG_DEPLOYMENT_PREFIX,
            d.self_link(),
            d.state()
        );

        ss.ensure_pod_bucket(d.self_link());

        let observed = d.state();
        let result = match observed {
            State::Created => self.handle_state_created(ss, &mut d).await,
            State::Provision => self.handle_state_provision(ss, &mut d).await,
            State::Ready => self.handle_state_ready(ss, &mut d).await,
            State::Error => self.handle_state_error(ss, &mut d).await,
            State::Degradation => self.handle_state_degradation(ss, &mut d).await,
            State::Destroy => self.handle_state_destroy(ss, &mut d).await,
            State::Destroyed => self.handle_state_destroyed(ss, &mut d).await,
            State::Warning => {
                warn!(
                    "{}:> deployment {} reported pod-only state {}, ignoring",
                    LOG_DEPLOYMENT_PREFIX,
                    d.self_link(),
                    observed
                );
                Ok(())
            }
        };
        if let Err(e) = result {
            error!(
                "{}:> handle deployment state {} err: {:#}",
                LOG_DEPLOYMENT_PREFIX, observed, e
            );
            return Err(e);
        }

        let link = d.self_link().to_string();
        let settled = d.state();
        if settled == State::Destroyed {
            ss.del_deployment(&link);
        } else {
            ss.upsert_deployment(d);
        }

        debug!(
            "{}:> observe state: {} > {}",
            LOG_DEPLOYMENT_PREFIX, link, settled
        );

        self.hooks.endpoint_check(ss).await?;
        self.hooks.service_status(ss).await?;

        debug!(
            "{}:> observe finish: {} > {}",
            LOG_DEPLOYMENT_PREFIX, link, settled
        );
        Ok(())
    }

    async fn handle_state_created(&self, ss: &mut ServiceState, d: &mut Deployment) -> Result<()> {
        debug!("{}:> handle state created: {}", LOG_DEPLOYMENT_PREFIX, d.self_link());
        self.deployment_pod_provision(ss, d).await
    }

    async fn handle_state_provision(&self, ss: &mut ServiceState, d: &mut Deployment) -> Result<()> {
        debug!("{}:> handle state provision: {}", LOG_DEPLOYMENT_PREFIX, d.self_link());
        self.deployment_pod_provision(ss, d).await
    }

    /// Cutover: a ready deployment replaces whatever was serving before.
    async fn handle_state_ready(&self, ss: &mut ServiceState, d: &mut Deployment) -> Result<()> {
        debug!("{}:> handle state ready: {}", LOG_DEPLOYMENT_PREFIX, d.self_link());

        let link = d.self_link().to_string();
        if let Some(active) = ss.deployment.active.clone()
            && active != link
        {
            match ss.deployment(&active).cloned() {
                Some(mut previous) => {
                    info!(
                        "{}:> cutover {} -> {}",
                        LOG_DEPLOYMENT_PREFIX, active, link
                    );
                    // Tracked copy stays untouched unless teardown succeeds.
                    self.deployment_destroy(ss.pod.list.get_mut(&active), &mut previous)
                        .await?;
                    ss.upsert_deployment(previous);
                }
                None => warn!(
                    "{}:> active deployment {} is no longer tracked",
                    LOG_DEPLOYMENT_PREFIX, active
                ),
            }
        }

        ss.set_active(&link);
        Ok(())
    }

    // An active deployment is never demoted from here; only a Ready
    // generation triggers cutover.
    async fn handle_state_error(&self, ss: &mut ServiceState, d: &mut Deployment) -> Result<()> {
        debug!("{}:> handle state error: {}", LOG_DEPLOYMENT_PREFIX, d.self_link());

        let link = d.self_link();
        if ss.deployment.active.is_none() {
            info!("{}:> adopting {} as active", LOG_DEPLOYMENT_PREFIX, link);
            ss.set_active(link);
        }
        ss.clear_provision_if(link);
        Ok(())
    }

    async fn handle_state_degradation(
        &self,
        ss: &mut ServiceState,
        d: &mut Deployment,
    ) -> Result<()> {
        debug!("{}:> handle state degradation: {}", LOG_DEPLOYMENT_PREFIX, d.self_link());

        self.deployment_pod_provision(ss, d).await?;

        let link = d.self_link();
        if ss.deployment.active.is_none() {
            info!("{}:> adopting {} as active", LOG_DEPLOYMENT_PREFIX, link);
            ss.set_active(link);
        } else {
            ss.clear_provision_if(link);
        }
        Ok(())
    }

    async fn handle_state_destroy(&self, ss: &mut ServiceState, d: &mut Deployment) -> Result<()> {
        debug!("{}:> handle state destroy: {}", LOG_DEPLOYMENT_PREFIX, d.self_link());

        let link = d.self_link().to_string();
        ss.clear_provision_if(&link);
        self.deployment_destroy(ss.pod.list.get_mut(&link), d).await?;

        if d.state() == State::Destroyed {
            return self.handle_state_destroyed(ss, d).await;
        }
        Ok(())
    }

    async fn handle_state_destroyed(&self, ss: &mut ServiceState, d: &mut Deployment) -> Result<()> {
        debug!("{}:> handle state destroyed: {}", LOG_DEPLOYMENT_PREFIX, d.self_link());

        let link = d.self_link().to_string();
        ss.clear_provision_if(&link);

        let tracked = ss.pods(&link).map_or(0, |pods| pods.len());
        if tracked > 0 {
            warn!(
                "{}:> deployment {} destroyed with {} tracked pods, reverting to destroy",
                LOG_DEPLOYMENT_PREFIX, link, tracked
            );
            self.deployment_destroy(ss.pod.list.get_mut(&link), d).await?;
            if d.state() != State::Destroy {
                d.status.state = State::Destroy;
                d.touch();
            }
            return self
                .deployments
                .update(d)
                .await
                .with_context(|| format!("update deployment {}", link));
        }

        self.deployment_remove(d).await?;
        ss.del_deployment(&link);
        Ok(())
    }

    /// Converge the deployment's live pod count to its desired replicas.
    ///
    /// Pods are created or destroyed one at a time, re-partitioning after
    /// each step. Pods with a node get their manifest re-published if it
    /// has gone missing.
    pub(crate) async fn deployment_pod_provision(
        &self,
        ss: &mut ServiceState,
        d: &mut Deployment,
    ) -> Result<()> {
        let captured = d.meta.updated;
        let desired = d.replicas();
        let pods = ss.ensure_pod_bucket(d.self_link());
        let mut provisioned = false;

        loop {
            let mut total = 0u32;
            let mut buckets: HashMap<State, Vec<String>> = HashMap::new();

            for (link, p) in pods.iter() {
                if !p.status.state.is_terminating() {
                    if let Some(node) = &p.meta.node {
                        let manifest = self
                            .pods
                            .manifest_get(node, link)
                            .await
                            .with_context(|| format!("get manifest of pod {} on {}", link, node))?;
                        if manifest.is_none() {
                            info!("{}:> republish missing manifest: {}", LOG_DEPLOYMENT_PREFIX, link);
                            self.pods
                                .manifest_put(p)
                                .await
                                .with_context(|| format!("put manifest of pod {}", link))?;
                        }
                    }
                    total += 1;
                }
                buckets.entry(p.status.state).or_default().push(link.clone());
            }

            match total.cmp(&desired) {
                Ordering::Equal => break,
                Ordering::Less => {
                    debug!("create additional replica: {} -> {}", total, desired);
                    let p = self
                        .pods
                        .create(d)
                        .await
                        .with_context(|| format!("create pod for {}", d.self_link()))?;
                    info!("{}:> created pod {}", LOG_DEPLOYMENT_PREFIX, p.self_link());
                    pods.insert(p.self_link().to_string(), p);
                    provisioned = true;
                }
                Ordering::Greater => {
                    debug!("remove unneeded replica: {} -> {}", total, desired);
                    let victim = match pick_victim(&buckets) {
                        Some(link) => pods.get_mut(&link),
                        None => None,
                    };
                    let Some(pod) = victim else {
                        anyhow::bail!(
                            "no pod eligible for removal in {} ({} live, {} desired)",
                            d.self_link(),
                            total,
                            desired
                        );
                    };
                    self.pod_destroy(pod).await?;
                    provisioned = true;
                }
            }
        }

        if provisioned && d.state() != State::Provision {
            d.status.state = State::Provision;
            d.touch();
        }

        self.deployment_update(d, captured).await
    }

    /// Tear a deployment down: destroy its pods, drop the ones already gone,
    /// and mark it `Destroyed` once none are left.
    pub(crate) async fn deployment_destroy(
        &self,
        pods: Option<&mut PodBucket>,
        d: &mut Deployment,
    ) -> Result<()> {
        let captured = d.meta.updated;

        if d.state() != State::Destroy {
            d.status.state = State::Destroy;
            d.touch();
        }

        match pods {
            None => {
                d.status.state = State::Destroyed;
                d.touch();
            }
            Some(pods) => {
                let links: Vec<String> = pods.keys().cloned().collect();
                for link in links {
                    let Some(pod) = pods.get_mut(&link) else {
                        continue;
                    };
                    if pod.status.state != State::Destroy {
                        self.pod_destroy(pod).await?;
                    }
                    if pod.status.state == State::Destroyed {
                        self.pods
                            .remove(pod)
                            .await
                            .with_context(|| format!("remove pod {}", link))?;
                        pods.remove(&link);
                    }
                }

                if pods.is_empty() {
                    d.status.state = State::Destroyed;
                    d.touch();
                }
            }
        }

        self.deployment_update(d, captured).await
    }

    /// Recompute the deployment's state from its pods.
    pub async fn deployment_status_state(&self, d: &mut Deployment, pods: &PodBucket) -> Result<()> {
        debug!(
            "{}:> status state start: {} > {}",
            LOG_DEPLOYMENT_PREFIX,
            d.self_link(),
            d.state()
        );

        let captured = d.meta.updated;
        let summary = PodSummary::from_pods(pods.values());
        if let Some((state, message)) = next_state(d.state(), &summary) {
            d.set_state(state, message);
        }

        debug!(
            "{}:> status state finish: {} > {}",
            LOG_DEPLOYMENT_PREFIX,
            d.self_link(),
            d.state()
        );
        self.deployment_update(d, captured).await
    }

    /// Change the desired replica count and restart provisioning.
    pub async fn deployment_scale(&self, d: &mut Deployment, replicas: &Replicas) -> Result<()> {
        info!(
            "{}:> scale {}: {} -> {}",
            LOG_DEPLOYMENT_PREFIX,
            d.self_link(),
            d.replicas(),
            replicas.count
        );
        d.spec.replicas = replicas.clone();
        d.status.state = State::Provision;
        d.touch();
        self.deployments
            .update(d)
            .await
            .with_context(|| format!("update deployment {}", d.self_link()))
    }

    pub(crate) async fn deployment_remove(&self, d: &Deployment) -> Result<()> {
        info!("{}:> remove {}", LOG_DEPLOYMENT_PREFIX, d.self_link());
        self.deployments
            .remove(d)
            .await
            .with_context(|| format!("remove deployment {}", d.self_link()))
    }

    /// Persist only if the deployment was stamped after `captured`.
    async fn deployment_update(&self, d: &Deployment, captured: DateTime<Utc>) -> Result<()> {
        if captured < d.meta.updated {
            self.deployments
                .update(d)
                .await
                .with_context(|| format!("update deployment {}", d.self_link()))?;
        }
        Ok(())
    }

    async fn pod_destroy(&self, pod: &mut Pod) -> Result<()> {
        self.pods
            .destroy(pod)
            .await
            .with_context(|| format!("destroy pod {}", pod.self_link()))?;
        if !pod.status.state.is_terminating() {
            pod.status.state = State::Destroy;
            pod.touch();
        }
        info!("{}:> destroyed pod {}", LOG_DEPLOYMENT_PREFIX, pod.self_link());
        Ok(())
    }
}

/// Whether the deployment still matches the service's template and selector.
pub fn deployment_spec_validate(d: &Deployment, svc: &Service) -> bool {
    d.spec.template.updated == svc.spec.template.updated
        && d.spec.selector.updated == svc.spec.selector.updated
}

fn pick_victim(buckets: &HashMap<State, Vec<String>>) -> Option<String> {
    DESTROY_PRIORITY
        .iter()
        .find_map(|state| buckets.get(state).and_then(|links| links.first()))
        .or_else(|| {
            DESTROY_FALLBACK
                .iter()
                .find_map(|state| buckets.get(state).and_then(|links| links.first()))
        })
        .cloned()
}
