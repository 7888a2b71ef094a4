//! Redundancy-mode policy wire types.

use serde::{Deserialize, Serialize};

use crate::{RedundancyMode, StreamId};

/// What the policy recommends for a stream, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedundancyRecommendation {
    pub stream_id: StreamId,
    pub popularity: u64,
    pub recommended_mode: RedundancyMode,
    pub manual_override: Option<RedundancyMode>,
    /// Mode actually frozen at first commit, if the stream has committed any
    /// chunks yet.
    pub effective_mode: Option<RedundancyMode>,
}

/// Body of `POST /redundancy/override/{stream_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetOverrideRequest {
    pub mode: RedundancyMode,
}

/// Storage-overhead efficiency report for one stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEfficiency {
    pub stream_id: StreamId,
    pub mode: RedundancyMode,
    /// physical stored bytes / logical payload bytes
    pub overhead_ratio: f64,
}

/// Overall storage overhead across all streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageOverheadReport {
    pub logical_bytes: u64,
    pub physical_bytes: u64,
    pub overhead_ratio: f64,
    pub per_stream: Vec<StreamEfficiency>,
}
