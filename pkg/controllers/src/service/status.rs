//! Pod-health aggregation and the deployment status transition table.

use pkg_types::pod::Pod;
use pkg_types::status::State;
use std::collections::HashMap;

use super::state::ServiceState;

/// Aggregate view of a deployment's pods.
#[derive(Debug, Default, Clone)]
pub struct PodSummary {
    buckets: HashMap<State, usize>,
    running: usize,
    total: usize,
    /// Message of the last errored pod seen.
    message: String,
}

impl PodSummary {
    pub fn from_pods<'a>(pods: impl IntoIterator<Item = &'a Pod>) -> Self {
        let mut summary = Self::default();
        for p in pods {
            *summary.buckets.entry(p.status.state).or_default() += 1;
            if p.status.state == State::Error {
                summary.message = p.status.message.clone();
            }
            if p.status.running {
                summary.running += 1;
            }
            summary.total += 1;
        }
        summary
    }

    pub fn count(&self, state: State) -> usize {
        self.buckets.get(&state).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn running(&self) -> usize {
        self.running
    }

    fn has(&self, state: State) -> bool {
        self.count(state) > 0
    }

    fn fully_ready(&self) -> bool {
        self.has(State::Ready) && self.running == self.total
    }

    fn fully_down(&self) -> bool {
        self.has(State::Error) && self.running == 0
    }

    fn provisioning(&self) -> bool {
        self.has(State::Provision)
    }
}

/// State a deployment should move to given its pods, with the status message
/// to record. `None` means the state stays as it is.
pub fn next_state(current: State, pods: &PodSummary) -> Option<(State, String)> {
    let ready = || Some((State::Ready, String::new()));
    let provision = || Some((State::Provision, String::new()));
    let error = || Some((State::Error, pods.message.clone()));
    let degradation = || Some((State::Degradation, String::new()));

    match current {
        State::Provision => {
            if pods.fully_ready() {
                ready()
            } else if pods.fully_down() {
                error()
            } else if pods.provisioning() {
                None
            } else {
                degradation()
            }
        }
        State::Ready => {
            if pods.fully_ready() {
                None
            } else if pods.provisioning() {
                provision()
            } else if pods.fully_down() {
                error()
            } else {
                degradation()
            }
        }
        State::Error => {
            if pods.fully_ready() {
                ready()
            } else if pods.fully_down() {
                None
            } else if pods.provisioning() {
                provision()
            } else {
                degradation()
            }
        }
        State::Degradation => {
            if pods.fully_ready() {
                ready()
            } else if pods.provisioning() {
                provision()
            } else if pods.fully_down() {
                error()
            } else {
                None
            }
        }
        State::Destroy if pods.total() == 0 => Some((State::Destroyed, String::new())),
        State::Created | State::Warning | State::Destroy | State::Destroyed => None,
    }
}

/// Overall service state derived from its deployments.
pub fn service_state(ss: &ServiceState) -> State {
    if ss.service().status.state.is_terminating() {
        return if ss.deployments().next().is_none() {
            State::Destroyed
        } else {
            State::Destroy
        };
    }
    if ss.provision().is_some() {
        return State::Provision;
    }
    match ss.active().map(|d| d.state()) {
        Some(State::Created) => State::Provision,
        Some(state) => state,
        None => State::Created,
    }
}
