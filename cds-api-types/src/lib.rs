//! Shared wire and catalog types for the chunked distributed store.
//!
//! Plays the same role `pbs-api-types` plays in `proxmox-backup`: a
//! dependency-light crate of types shared by every other crate, with no I/O
//! of its own.

mod commit;
mod enums;
mod error;
mod hash;
mod ids;
mod manifest;
mod node;
mod redundancy;
mod storage_node;
mod stream;

pub use commit::{CommitOutcome, CommitRequest, FragmentMetadata, ProposalState};
pub use enums::{NodeState, ProposalPhase, RedundancyMode, ReplicaStatus, StreamStatus};
pub use error::{CdsError, ErrorBody};
pub use hash::ContentHash;
pub use ids::{Ballot, ChunkId, NodeId, StreamId};
pub use manifest::{ChunkLocations, FragmentLocation, ManifestEntry, ReplicaLocation, StreamManifest};
pub use node::{Heartbeat, NodeRegistration, NodeSummary};
pub use redundancy::{
    RedundancyRecommendation, SetOverrideRequest, StorageOverheadReport, StreamEfficiency,
};
pub use storage_node::{ChunkLocation, HealthReport, HealthStatus, ProbeInfo, PutOutcome};
pub use stream::{CreateStreamRequest, StreamSummary};
