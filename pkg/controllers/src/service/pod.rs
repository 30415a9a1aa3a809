use anyhow::{Context, Result};
use pkg_types::pod::Pod;
use pkg_types::status::State;
use tracing::debug;

use super::state::ServiceState;
use super::{LOG_POD_PREFIX, ServiceController};

impl ServiceController {
    /// Apply one observed pod snapshot, then let its deployment react to
    /// the new aggregate pod health.
    pub async fn observe_pod(&self, ss: &mut ServiceState, pod: Pod) -> Result<()> {
        let link = pod.self_link().to_string();
        let parent = pod.deployment_link();
        debug!(
            "{}:> observe start: {} > {}",
            LOG_POD_PREFIX, link, pod.status.state
        );

        if pod.status.state == State::Destroyed {
            self.pods
                .remove(&pod)
                .await
                .with_context(|| format!("remove pod {}", link))?;
            if let Some(bucket) = ss.pod.list.get_mut(&parent) {
                bucket.remove(&link);
            }
        } else {
            ss.ensure_pod_bucket(&parent).insert(link.clone(), pod);
        }

        let Some(mut d) = ss.deployment(&parent).cloned() else {
            debug!(
                "{}:> pod {} belongs to untracked deployment {}",
                LOG_POD_PREFIX, link, parent
            );
            return Ok(());
        };

        let before = d.state();
        match ss.pods(&parent) {
            Some(pods) => self.deployment_status_state(&mut d, pods).await?,
            None => self.deployment_status_state(&mut d, &Default::default()).await?,
        }

        debug!(
            "{}:> observe finish: {} > deployment {} {} -> {}",
            LOG_POD_PREFIX,
            link,
            parent,
            before,
            d.state()
        );

        if d.state() != before {
            return self.observe_deployment(ss, d).await;
        }
        ss.upsert_deployment(d);
        Ok(())
    }
}
