use pkg_types::node::{Node, NodeStatus};
use pkg_types::pod::{Pod, PodSpec, TaintEffect, TolerationOperator};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Round-robin pod placement over the nodes that pass filtering
/// (readiness, cordon, affinity, taints, free resources).
pub struct Scheduler {
    round_robin_index: AtomicUsize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            round_robin_index: AtomicUsize::new(0),
        }
    }

    /// Pick a node for the pod. Returns the node id, or `None` if the pod
    /// has to stay unscheduled for now.
    pub fn schedule(&self, pod: &Pod, nodes: &[Node]) -> Option<String> {
        let eligible: Vec<&Node> = nodes
            .iter()
            .filter(|n| is_node_eligible(n, &pod.spec))
            .collect();

        if eligible.is_empty() {
            info!("No eligible nodes for pod {}", pod.self_link());
            return None;
        }

        let idx = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % eligible.len();
        let selected = eligible[idx];

        info!(
            "Scheduled pod {} → node {} ({})",
            pod.self_link(),
            selected.name,
            selected.id
        );
        Some(selected.id.clone())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn is_node_eligible(node: &Node, spec: &PodSpec) -> bool {
    if node.status != NodeStatus::Ready || node.unschedulable {
        debug!("Node {} skipped: {} / cordoned={}", node.name, node.status, node.unschedulable);
        return false;
    }
    matches_affinity(node, spec) && tolerates_taints(node, spec) && fits_resources(node, spec)
}

/// Every required affinity label must be present with the same value.
fn matches_affinity(node: &Node, spec: &PodSpec) -> bool {
    spec.node_affinity
        .iter()
        .all(|(key, value)| node.labels.get(key) == Some(value))
}

/// Hard taints (NoSchedule / NoExecute) must each be tolerated.
fn tolerates_taints(node: &Node, spec: &PodSpec) -> bool {
    node.taints.iter().all(|taint| {
        if taint.effect == TaintEffect::PreferNoSchedule {
            return true;
        }
        spec.tolerations.iter().any(|t| {
            t.key == taint.key
                && match t.operator {
                    TolerationOperator::Exists => true,
                    TolerationOperator::Equal => t.value == taint.value,
                }
        })
    })
}

/// A capacity of zero means the node did not report that resource.
fn fits_resources(node: &Node, spec: &PodSpec) -> bool {
    let cpu: u64 = spec.containers.iter().map(|c| c.resources.cpu_millis).sum();
    let mem: u64 = spec.containers.iter().map(|c| c.resources.memory_bytes).sum();

    let cpu_ok = node.capacity.cpu_millis == 0
        || cpu <= node.capacity.cpu_millis.saturating_sub(node.allocated.cpu_millis);
    let mem_ok = node.capacity.memory_bytes == 0
        || mem <= node.capacity.memory_bytes.saturating_sub(node.allocated.memory_bytes);
    cpu_ok && mem_ok
}
