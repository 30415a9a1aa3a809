use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A running pod backing a Service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointAddress {
    pub node_id: String,
    pub pod: String,
}

/// Endpoint represents the set of backend addresses for a Service,
/// taken from its active deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub service: String,
    pub namespace: String,
    /// Self-link of the deployment currently serving traffic.
    #[serde(default)]
    pub deployment: Option<String>,
    pub addresses: Vec<EndpointAddress>,
    pub updated: DateTime<Utc>,
}
