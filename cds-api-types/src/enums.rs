//! Small closed enums shared by the catalog and the wire protocol.
//!
//! Per the design note on "per-request response objects carrying dynamic
//! fields", every one of these is a closed Rust enum rather than an
//! open-ended string, so an unrecognized value is a deserialization error
//! instead of a silently-accepted typo.

use proxmox_schema::api;
use serde::{Deserialize, Serialize};

#[api]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Lifecycle status of a [`crate::StreamId`].
pub enum StreamStatus {
    /// Writer is still committing chunks.
    Uploading,
    /// All chunks committed; readable.
    Active,
    /// Tombstoned by an explicit delete.
    Deleted,
}

#[api]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Redundancy mode chosen for a stream at first-commit time. Frozen for the
/// life of the stream; no dynamic migration.
pub enum RedundancyMode {
    /// N-way replication.
    Replicated,
    /// Reed-Solomon erasure coding with K data + M parity shards.
    Erasure,
}

#[api]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Status of one replica row.
pub enum ReplicaStatus {
    Pending,
    Active,
    Failed,
}

#[api]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Phase of a chunk's placement proposal; progresses monotonically and
/// never regresses.
pub enum ProposalPhase {
    None,
    Prepare,
    Accept,
    Committed,
}

#[api]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Derived node health state.
pub enum NodeState {
    Healthy,
    Warning,
    Critical,
    Unreachable,
}
