//! State store key layout and reconciliation constants.

/// Prefix for persisted Service records: `<prefix><namespace>/<name>`.
pub const SERVICES_PREFIX: &str = "/registry/services/";

/// Prefix for persisted Deployment records: `<prefix><namespace>/<service>/<name>`.
pub const DEPLOYMENTS_PREFIX: &str = "/registry/deployments/";

/// Prefix for persisted Pod records: `<prefix><namespace>/<service>/<deployment>/<name>`.
pub const PODS_PREFIX: &str = "/registry/pods/";

/// Prefix for persisted Node records: `<prefix><node-id>`.
pub const NODES_PREFIX: &str = "/registry/nodes/";

/// Prefix for per-node pod manifests: `<prefix><node-id>/<pod-self-link>`.
pub const MANIFESTS_PREFIX: &str = "/registry/manifests/";

/// Prefix for computed service endpoints: `<prefix><namespace>/<service>`.
pub const ENDPOINTS_PREFIX: &str = "/registry/endpoints/";

/// Separator between segments of a self-link.
pub const SELF_LINK_SEPARATOR: char = ':';

/// How often the controller re-reads the store and re-delivers observations.
pub const DEFAULT_RESYNC_SECS: u64 = 10;

/// Capacity of each per-service observation channel.
pub const SERVICE_QUEUE_CAPACITY: usize = 256;
