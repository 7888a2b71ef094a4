//! Node registry wire types.

use serde::{Deserialize, Serialize};

use crate::{NodeId, NodeState};

/// Body of a node registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: NodeId,
    pub url: String,
    pub version: String,
}

/// Body of a heartbeat, carrying the fields the coordinator needs to derive
/// node state on read. There is no background state machine beyond the
/// heartbeat-age computation; state is derived fresh on every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: NodeId,
    pub disk_usage_fraction: f64,
    pub chunk_count: u64,
}

/// A node record as returned by the node-listing endpoints, with state
/// derived at read time rather than stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node_id: NodeId,
    pub url: String,
    pub version: String,
    pub last_heartbeat_secs_ago: Option<f64>,
    pub disk_usage_fraction: f64,
    pub chunk_count: u64,
    pub state: NodeState,
}
