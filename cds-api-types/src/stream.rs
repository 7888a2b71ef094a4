//! Stream catalog wire types.

use serde::{Deserialize, Serialize};

use crate::{RedundancyMode, StreamId, StreamStatus};

/// Body of `POST /streams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStreamRequest {
    pub title: String,
    pub chunk_duration_secs: f64,
    pub chunk_payload_size: u32,
    pub total_chunk_count: u64,
}

/// Response to `POST /streams` and an entry in `GET /streams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSummary {
    pub stream_id: StreamId,
    pub title: String,
    pub status: StreamStatus,
    pub chunk_duration_secs: f64,
    pub chunk_payload_size: u32,
    pub total_chunk_count: u64,
    pub committed_chunk_count: u64,
    pub popularity: u64,
    pub redundancy_mode: Option<RedundancyMode>,
}
