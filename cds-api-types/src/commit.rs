//! Chunk-placement commit protocol wire types.

use serde::{Deserialize, Serialize};

use crate::{Ballot, ChunkId, ContentHash, NodeId, RedundancyMode, StreamId};

/// Per-fragment metadata a writer supplies for an erasure-mode commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentMetadata {
    pub fragment_index: u8,
    pub node_id: NodeId,
    pub size: u32,
    pub hash: ContentHash,
}

/// Body of a commit request: commit the chunk body already uploaded to
/// these candidate nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub stream_id: StreamId,
    pub sequence_num: u64,
    pub node_ids: Vec<NodeId>,
    pub hash: ContentHash,
    pub size: u32,
    pub redundancy_mode: RedundancyMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_metadata: Option<Vec<FragmentMetadata>>,
}

/// Outcome of a commit attempt for one chunk-id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum CommitOutcome {
    Committed {
        chunk_id: ChunkId,
        ballot: Ballot,
        confirmed_nodes: Vec<NodeId>,
    },
    QuorumNotReached {
        chunk_id: ChunkId,
        confirmed: usize,
        required: usize,
    },
    Conflict {
        chunk_id: ChunkId,
        message: String,
    },
}

/// Snapshot of a chunk's placement-proposal state, for diagnostics
/// (`GET .../proposal`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalState {
    pub chunk_id: ChunkId,
    pub promised_ballot: Ballot,
    pub accepted_ballot: Ballot,
    pub phase: crate::ProposalPhase,
    pub accepted_nodes: Vec<NodeId>,
}
