use anyhow::{Context, Result};
use pkg_types::deployment::Deployment;
use pkg_types::service::Service;
use pkg_types::status::State;
use tracing::{debug, info};

use super::deployment::deployment_spec_validate;
use super::state::ServiceState;
use super::{LOG_SERVICE_PREFIX, ServiceController};

impl ServiceController {
    /// Apply an observed service spec: start a new generation when the spec
    /// drifted, rescale the current one when only replicas changed, and
    /// tear everything down once the service is being destroyed.
    pub async fn observe_service(&self, ss: &mut ServiceState, svc: Service) -> Result<()> {
        debug!(
            "{}:> observe start: {} > {}",
            LOG_SERVICE_PREFIX,
            svc.self_link(),
            svc.status.state
        );
        ss.service = svc;

        if ss.service.status.state.is_terminating() {
            return self.service_teardown(ss).await;
        }

        let current = [ss.provision(), ss.active()]
            .into_iter()
            .flatten()
            .find(|d| !d.state().is_terminating() && deployment_spec_validate(d, &ss.service))
            .cloned();

        // A rollout of anything but the current spec is obsolete.
        if let Some(provision) = ss.provision_link().map(str::to_string)
            && current.as_ref().map(|d| d.self_link()) != Some(provision.as_str())
        {
            info!(
                "{}:> rollout {} superseded by new spec",
                LOG_SERVICE_PREFIX, provision
            );
            self.deployment_retire(ss, &provision).await?;
        }

        match current {
            None => {
                let d = self.deployment_create(ss).await?;
                self.observe_deployment(ss, d).await
            }
            Some(mut d) if d.replicas() != ss.service.spec.replicas.count => {
                let replicas = ss.service.spec.replicas.clone();
                self.deployment_scale(&mut d, &replicas).await?;
                self.observe_deployment(ss, d).await
            }
            Some(_) => Ok(()),
        }
    }

    /// Persist a new generation for the service and track it as the
    /// rollout in progress.
    pub async fn deployment_create(&self, ss: &mut ServiceState) -> Result<Deployment> {
        let d = self
            .deployments
            .create(&ss.service)
            .await
            .with_context(|| format!("create deployment for {}", ss.service.self_link()))?;
        info!(
            "{}:> created deployment {} ({} replicas)",
            LOG_SERVICE_PREFIX,
            d.self_link(),
            d.replicas()
        );

        let link = d.self_link().to_string();
        ss.ensure_pod_bucket(&link);
        ss.upsert_deployment(d.clone());
        ss.set_provision(&link);
        Ok(d)
    }

    async fn service_teardown(&self, ss: &mut ServiceState) -> Result<()> {
        let live: Vec<String> = ss
            .deployments()
            .filter(|d| !d.state().is_terminating())
            .map(|d| d.self_link().to_string())
            .collect();
        for link in live {
            self.deployment_retire(ss, &link).await?;
        }

        self.hooks.endpoint_check(ss).await?;
        self.hooks.service_status(ss).await
    }

    /// Start teardown of a tracked deployment outside of its own observation.
    async fn deployment_retire(&self, ss: &mut ServiceState, link: &str) -> Result<()> {
        let Some(mut d) = ss.deployment(link).cloned() else {
            return Ok(());
        };
        ss.clear_provision_if(link);
        self.deployment_destroy(ss.pod.list.get_mut(link), &mut d).await?;

        if d.state() == State::Destroyed {
            self.deployment_remove(&d).await?;
            ss.del_deployment(link);
        } else {
            ss.upsert_deployment(d);
        }
        Ok(())
    }
}
