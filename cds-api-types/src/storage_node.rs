//! Storage-node wire types.

use serde::{Deserialize, Serialize};

/// Body of `GET /health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub disk_usage: f64,
    pub chunk_count: u64,
    pub uptime_secs: u64,
    pub node_id: String,
}

/// What `put`/`head`/`get` return about where a chunk landed on disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub superblock_id: u64,
    pub offset: u64,
    pub length: u32,
}

/// Minimal-latency `HEAD /ping` response body; also carried in the
/// `X-Node-ID` / `X-Disk-Usage-Percent` / `X-Chunk-Count` headers the reader
/// actually measures latency against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub node_id: String,
    pub disk_usage_fraction: f64,
    pub chunk_count: u64,
}

/// Outcome of a successful `put`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PutOutcome {
    pub hash: crate::ContentHash,
    pub size: u32,
    /// `false` when the put was an idempotent no-op against an
    /// already-present id.
    pub created: bool,
}
