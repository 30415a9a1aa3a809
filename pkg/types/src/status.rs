use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// --- Lifecycle state ---

/// Lifecycle state shared by services, deployments and pods.
/// Pods additionally report `Warning`; deployments never do.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum State {
    #[default]
    Created,
    Provision,
    Ready,
    Warning,
    Error,
    Degradation,
    Destroy,
    Destroyed,
}

impl State {
    /// True once teardown has been requested or completed.
    pub fn is_terminating(self) -> bool {
        matches!(self, State::Destroy | State::Destroyed)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Created => write!(f, "created"),
            State::Provision => write!(f, "provision"),
            State::Ready => write!(f, "ready"),
            State::Warning => write!(f, "warning"),
            State::Error => write!(f, "error"),
            State::Degradation => write!(f, "degradation"),
            State::Destroy => write!(f, "destroy"),
            State::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Next update timestamp for a record last stamped at `prev`.
///
/// Always strictly later than `prev`, even when the wall clock has not
/// moved (or moved backwards) since the previous stamp.
pub fn next_timestamp(prev: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > prev {
        now
    } else {
        prev + Duration::microseconds(1)
    }
}
