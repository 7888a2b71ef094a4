//! The per-stream manifest dispensed to readers.
//!
//! Immutable for the life of the stream once all chunks are committed
//! (invariant: two manifest fetches for an `active` stream return identical
//! chunk lists).

use serde::{Deserialize, Serialize};

use crate::{ChunkId, ContentHash, NodeId, RedundancyMode, StreamId, StreamStatus};

/// One replica location: a node that holds the full chunk body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaLocation {
    pub node_id: NodeId,
    pub url: String,
}

/// One fragment location: a node that holds a single erasure shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentLocation {
    pub fragment_index: u8,
    pub node_id: NodeId,
    pub url: String,
    /// Hash of this fragment's own bytes, not the chunk's, so the reader can
    /// discard a corrupt fragment before feeding it to reconstruction.
    pub hash: ContentHash,
    pub size: u32,
}

/// Per-entry locations, shaped as a union so a replicated entry never carries
/// a dangling empty fragment list and vice versa (design note: "union types
/// for optional variants").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ChunkLocations {
    Replicated { replicas: Vec<ReplicaLocation> },
    Erasure {
        k: u8,
        m: u8,
        fragments: Vec<FragmentLocation>,
    },
}

impl ChunkLocations {
    pub fn mode(&self) -> RedundancyMode {
        match self {
            ChunkLocations::Replicated { .. } => RedundancyMode::Replicated,
            ChunkLocations::Erasure { .. } => RedundancyMode::Erasure,
        }
    }
}

/// One chunk's entry in a stream manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub chunk_id: ChunkId,
    pub sequence_num: u64,
    pub size: u32,
    pub hash: ContentHash,
    pub locations: ChunkLocations,
}

/// Self-contained listing of a stream's chunks in sequence order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamManifest {
    pub stream_id: StreamId,
    pub title: String,
    pub status: StreamStatus,
    pub chunk_duration_secs: f64,
    pub chunk_payload_size: u32,
    pub total_chunks: u64,
    pub entries: Vec<ManifestEntry>,
}
