//! The chunk-placement commit protocol: propose, verify presence (prepare),
//! accept-and-commit. One commit proposal for one
//! chunk-id serializes through [`crate::locks::ChunkLockTable`]; proposals
//! for distinct chunk-ids are fully concurrent and never interact.

use anyhow::Error;
use cds_api_types::{
    Ballot, CdsError, ChunkId, ChunkLocations, CommitOutcome, CommitRequest, ContentHash,
    FragmentLocation, NodeId, ProposalPhase, ProposalState, RedundancyMode, ReplicaLocation,
    StreamStatus,
};
use cds_config::CoordinatorConfig;
use rusqlite::{params, OptionalExtension};

use crate::catalog::Catalog;
use crate::convert::{enum_from_text, enum_to_text};

impl Catalog {
    /// Chooses a ballot strictly greater than any
    /// previously promised for this chunk-id and persists it as the new
    /// promised ballot. The caller then issues head requests to the
    /// candidate nodes at this ballot before calling [`Catalog::commit_proposal`].
    pub fn begin_proposal(&self, chunk_id: &ChunkId) -> Result<Ballot, Error> {
        self.locks.with_lock(chunk_id, || {
            let conn = self.conn.lock().unwrap();
            let promised: Option<i64> = conn
                .query_row(
                    "SELECT promised_ballot FROM placement_proposals WHERE chunk_id = ?1",
                    params![chunk_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let next = Ballot(promised.unwrap_or(0) as u64).next();

            conn.execute(
                "INSERT INTO placement_proposals (chunk_id, promised_ballot, phase)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(chunk_id) DO UPDATE SET
                    promised_ballot = excluded.promised_ballot,
                    phase = excluded.phase",
                params![chunk_id.as_str(), next.0 as i64, enum_to_text(&ProposalPhase::Prepare)],
            )?;
            Ok(next)
        })
    }

    /// Steps 3/4: commits if `confirmed_nodes` reaches quorum (or, for
    /// erasure mode, covers every fragment); otherwise aborts with
    /// `quorum-not-reached` without touching any previously accepted value.
    /// `ballot` must still be the currently promised ballot for this
    /// chunk-id — if a newer proposal has since raised it, this call
    /// refuses with `conflict`.
    pub fn commit_proposal(
        &self,
        request: &CommitRequest,
        ballot: Ballot,
        confirmed_nodes: &[NodeId],
    ) -> Result<CommitOutcome, CdsError> {
        let chunk_id = ChunkId::derive(request.stream_id, request.sequence_num);
        self.locks
            .with_lock(&chunk_id, || self.commit_locked(&chunk_id, request, ballot, confirmed_nodes))
    }

    fn commit_locked(
        &self,
        chunk_id: &ChunkId,
        request: &CommitRequest,
        ballot: Ballot,
        confirmed_nodes: &[NodeId],
    ) -> Result<CommitOutcome, CdsError> {
        let mut conn = self.conn.lock().unwrap();

        if let Some(existing) = read_committed(&conn, chunk_id).map_err(fatal)? {
            // committed chunks are immutable; repeating an already-committed
            // commit is a harmless idempotent echo.
            return Ok(existing);
        }

        let promised: i64 = conn
            .query_row(
                "SELECT promised_ballot FROM placement_proposals WHERE chunk_id = ?1",
                params![chunk_id.as_str()],
                |row| row.get(0),
            )
            .map_err(fatal)?;
        if promised as u64 != ballot.0 {
            return Err(CdsError::Conflict(format!(
                "chunk '{chunk_id}' promised ballot has advanced past {ballot}; retry with a fresh ballot"
            )));
        }

        let required = match request.redundancy_mode {
            RedundancyMode::Replicated => CoordinatorConfig::quorum_size(request.node_ids.len()),
            RedundancyMode::Erasure => request
                .fragment_metadata
                .as_ref()
                .map(|f| f.len())
                .unwrap_or(request.node_ids.len()),
        };

        if confirmed_nodes.len() < required {
            return Ok(CommitOutcome::QuorumNotReached {
                chunk_id: chunk_id.clone(),
                confirmed: confirmed_nodes.len(),
                required,
            });
        }
        if confirmed_nodes.len() < 2 {
            return Err(CdsError::BadRequest(format!(
                "commit below 2 confirmed nodes is refused for chunk '{chunk_id}'"
            )));
        }

        let tx = conn.transaction().map_err(fatal)?;

        // redundancy mode is frozen at the stream's first committed chunk,
        // with no dynamic migration; later commits must match.
        let frozen_mode: Option<String> = tx
            .query_row(
                "SELECT redundancy_mode FROM streams WHERE stream_id = ?1",
                params![request.stream_id.to_string()],
                |row| row.get(0),
            )
            .map_err(fatal)?;
        match frozen_mode {
            Some(mode) => {
                let frozen: RedundancyMode = enum_from_text(&mode).map_err(|err| CdsError::Fatal(err.to_string()))?;
                if frozen != request.redundancy_mode {
                    return Err(CdsError::BadRequest(format!(
                        "stream '{}' redundancy mode is frozen at {frozen:?}; cannot commit chunk with {:?}",
                        request.stream_id, request.redundancy_mode
                    )));
                }
            }
            None => {
                tx.execute(
                    "UPDATE streams SET redundancy_mode = ?1 WHERE stream_id = ?2",
                    params![enum_to_text(&request.redundancy_mode), request.stream_id.to_string()],
                )
                .map_err(fatal)?;
            }
        }

        tx.execute(
            "INSERT INTO chunks (chunk_id, stream_id, sequence_num, size, hash, redundancy_mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                chunk_id.as_str(),
                request.stream_id.to_string(),
                request.sequence_num as i64,
                request.size,
                request.hash.to_string(),
                enum_to_text(&request.redundancy_mode),
            ],
        )
        .map_err(fatal)?;

        match request.redundancy_mode {
            RedundancyMode::Replicated => {
                for node_id in confirmed_nodes {
                    tx.execute(
                        "INSERT INTO replicas (chunk_id, node_id, status, ballot) VALUES (?1, ?2, 'active', ?3)",
                        params![chunk_id.as_str(), node_id.as_str(), ballot.0 as i64],
                    )
                    .map_err(fatal)?;
                }
            }
            RedundancyMode::Erasure => {
                for fragment in request.fragment_metadata.as_deref().unwrap_or_default() {
                    tx.execute(
                        "INSERT INTO fragments (chunk_id, fragment_index, node_id, size, hash, status)
                         VALUES (?1, ?2, ?3, ?4, ?5, 'active')",
                        params![
                            chunk_id.as_str(),
                            fragment.fragment_index as i64,
                            fragment.node_id.as_str(),
                            fragment.size,
                            fragment.hash.to_string(),
                        ],
                    )
                    .map_err(fatal)?;
                }
            }
        }

        // the stream advances to `active` once every chunk it declared at
        // creation time has a committed chunk row.
        tx.execute(
            "UPDATE streams
             SET status = ?1
             WHERE stream_id = ?2
               AND status = ?3
               AND (SELECT COUNT(*) FROM chunks WHERE stream_id = ?2) >= total_chunk_count",
            params![
                enum_to_text(&StreamStatus::Active),
                request.stream_id.to_string(),
                enum_to_text(&StreamStatus::Uploading),
            ],
        )
        .map_err(fatal)?;

        let accepted_json = serde_json::to_string(
            &confirmed_nodes.iter().map(|n| n.as_str()).collect::<Vec<_>>(),
        )
        .map_err(|err| CdsError::Fatal(err.to_string()))?;
        tx.execute(
            "UPDATE placement_proposals SET accepted_ballot = ?1, accepted_nodes = ?2, phase = ?3
             WHERE chunk_id = ?4",
            params![
                ballot.0 as i64,
                accepted_json,
                enum_to_text(&ProposalPhase::Committed),
                chunk_id.as_str(),
            ],
        )
        .map_err(fatal)?;

        tx.commit().map_err(fatal)?;
        log::info!("committed chunk {chunk_id} at ballot {ballot} to {} nodes", confirmed_nodes.len());

        Ok(CommitOutcome::Committed {
            chunk_id: chunk_id.clone(),
            ballot,
            confirmed_nodes: confirmed_nodes.to_vec(),
        })
    }

    pub fn get_proposal_state(&self, chunk_id: &ChunkId) -> Result<Option<ProposalState>, Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT promised_ballot, accepted_ballot, phase, accepted_nodes
             FROM placement_proposals WHERE chunk_id = ?1",
            params![chunk_id.as_str()],
            |row| {
                let promised_ballot: i64 = row.get(0)?;
                let accepted_ballot: i64 = row.get(1)?;
                let phase: String = row.get(2)?;
                let accepted_nodes: Option<String> = row.get(3)?;
                Ok((promised_ballot, accepted_ballot, phase, accepted_nodes))
            },
        )
        .optional()?
        .map(|(promised_ballot, accepted_ballot, phase, accepted_nodes)| {
            Ok(ProposalState {
                chunk_id: chunk_id.clone(),
                promised_ballot: Ballot(promised_ballot as u64),
                accepted_ballot: Ballot(accepted_ballot as u64),
                phase: enum_from_text(&phase)?,
                accepted_nodes: parse_accepted_nodes(accepted_nodes.as_deref()),
            })
        })
        .transpose()
    }

    /// `ChunkLocations` for a committed chunk (the "get placement commit
    /// for chunk-id" read endpoint).
    pub fn get_chunk_locations(&self, chunk_id: &ChunkId) -> Result<Option<ChunkLocations>, Error> {
        let conn = self.conn.lock().unwrap();
        Ok(read_committed(&conn, chunk_id)?.and_then(|outcome| match outcome {
            CommitOutcome::Committed { .. } => locations_for_chunk(&conn, chunk_id).ok(),
            _ => None,
        }))
    }

    pub fn get_fragment_listing(&self, chunk_id: &ChunkId) -> Result<Vec<FragmentLocation>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT f.fragment_index, f.node_id, n.url, f.hash, f.size FROM fragments f
             JOIN nodes n ON n.node_id = f.node_id
             WHERE f.chunk_id = ?1 ORDER BY f.fragment_index ASC",
        )?;
        let rows = stmt.query_map(params![chunk_id.as_str()], |row| {
            let hash: String = row.get(3)?;
            let size: i64 = row.get(4)?;
            Ok(FragmentLocation {
                fragment_index: row.get::<_, i64>(0)? as u8,
                node_id: NodeId::parse(row.get::<_, String>(1)?).unwrap_or_else(|_| NodeId::parse("unknown").unwrap()),
                url: row.get(2)?,
                hash: hash.parse().unwrap_or_else(|_| ContentHash::of(b"")),
                size: size as u32,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }
}

fn fatal(err: rusqlite::Error) -> CdsError {
    CdsError::Fatal(err.to_string())
}

fn parse_accepted_nodes(json: Option<&str>) -> Vec<NodeId> {
    json.and_then(|text| serde_json::from_str::<Vec<String>>(text).ok())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| NodeId::parse(s).ok())
        .collect()
}

fn read_committed(conn: &rusqlite::Connection, chunk_id: &ChunkId) -> rusqlite::Result<Option<CommitOutcome>> {
    conn.query_row(
        "SELECT accepted_ballot, accepted_nodes FROM placement_proposals WHERE chunk_id = ?1 AND phase = 'committed'",
        params![chunk_id.as_str()],
        |row| {
            let accepted_ballot: i64 = row.get(0)?;
            let accepted_nodes: Option<String> = row.get(1)?;
            Ok(CommitOutcome::Committed {
                chunk_id: chunk_id.clone(),
                ballot: Ballot(accepted_ballot as u64),
                confirmed_nodes: parse_accepted_nodes(accepted_nodes.as_deref()),
            })
        },
    )
    .optional()
}

fn locations_for_chunk(conn: &rusqlite::Connection, chunk_id: &ChunkId) -> rusqlite::Result<ChunkLocations> {
    let mode: String = conn.query_row(
        "SELECT redundancy_mode FROM chunks WHERE chunk_id = ?1",
        params![chunk_id.as_str()],
        |row| row.get(0),
    )?;
    let mode: RedundancyMode = enum_from_text(&mode).expect("redundancy_mode column is always valid");

    match mode {
        RedundancyMode::Replicated => {
            let mut stmt = conn.prepare(
                "SELECT r.node_id, n.url FROM replicas r JOIN nodes n ON n.node_id = r.node_id
                 WHERE r.chunk_id = ?1 AND r.status = 'active'",
            )?;
            let replicas = stmt
                .query_map(params![chunk_id.as_str()], |row| {
                    Ok(ReplicaLocation {
                        node_id: NodeId::parse(row.get::<_, String>(0)?).unwrap_or_else(|_| NodeId::parse("unknown").unwrap()),
                        url: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ChunkLocations::Replicated { replicas })
        }
        RedundancyMode::Erasure => {
            let mut stmt = conn.prepare(
                "SELECT f.fragment_index, f.node_id, n.url, f.hash, f.size FROM fragments f
                 JOIN nodes n ON n.node_id = f.node_id
                 WHERE f.chunk_id = ?1 ORDER BY f.fragment_index ASC",
            )?;
            let fragments = stmt
                .query_map(params![chunk_id.as_str()], |row| {
                    let hash: String = row.get(3)?;
                    let size: i64 = row.get(4)?;
                    Ok(FragmentLocation {
                        fragment_index: row.get::<_, i64>(0)? as u8,
                        node_id: NodeId::parse(row.get::<_, String>(1)?).unwrap_or_else(|_| NodeId::parse("unknown").unwrap()),
                        url: row.get(2)?,
                        hash: hash.parse().unwrap_or_else(|_| ContentHash::of(b"")),
                        size: size as u32,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            // k/m not recoverable from the chunks table alone; the caller
            // that needs them (the reader) already has them from the
            // manifest's top-level entry, so 0/0 here signals "see manifest".
            Ok(ChunkLocations::Erasure { k: 0, m: 0, fragments })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cds_api_types::{ContentHash, CreateStreamRequest, NodeRegistration};

    fn setup_nodes(catalog: &Catalog, ids: &[&str]) {
        for id in ids {
            catalog
                .register_node(&NodeRegistration {
                    node_id: NodeId::parse(*id).unwrap(),
                    url: format!("http://{id}.local:8420"),
                    version: "0.1.0".to_string(),
                })
                .unwrap();
        }
    }

    fn stream(catalog: &Catalog) -> cds_api_types::StreamId {
        catalog
            .create_stream(&CreateStreamRequest {
                title: "t".to_string(),
                chunk_duration_secs: 10.0,
                chunk_payload_size: 1 << 21,
                total_chunk_count: 10,
            })
            .unwrap()
            .stream_id
    }

    #[test]
    fn commit_succeeds_with_quorum() {
        let catalog = Catalog::open_in_memory(CoordinatorConfig::default()).unwrap();
        setup_nodes(&catalog, &["a", "b", "c"]);
        let stream_id = stream(&catalog);
        let chunk_id = ChunkId::derive(stream_id, 0);

        let ballot = catalog.begin_proposal(&chunk_id).unwrap();
        let request = CommitRequest {
            stream_id,
            sequence_num: 0,
            node_ids: vec![NodeId::parse("a").unwrap(), NodeId::parse("b").unwrap(), NodeId::parse("c").unwrap()],
            hash: ContentHash::of(b"chunk bytes"),
            size: 11,
            redundancy_mode: RedundancyMode::Replicated,
            fragment_metadata: None,
        };
        let confirmed = vec![NodeId::parse("a").unwrap(), NodeId::parse("b").unwrap()];
        let outcome = catalog.commit_proposal(&request, ballot, &confirmed).unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed { .. }));

        let locations = catalog.get_chunk_locations(&chunk_id).unwrap().unwrap();
        assert!(matches!(locations, ChunkLocations::Replicated { replicas } if replicas.len() == 2));
    }

    #[test]
    fn commit_fails_below_quorum() {
        let catalog = Catalog::open_in_memory(CoordinatorConfig::default()).unwrap();
        setup_nodes(&catalog, &["a", "b", "c"]);
        let stream_id = stream(&catalog);
        let chunk_id = ChunkId::derive(stream_id, 0);
        let ballot = catalog.begin_proposal(&chunk_id).unwrap();
        let request = CommitRequest {
            stream_id,
            sequence_num: 0,
            node_ids: vec![NodeId::parse("a").unwrap(), NodeId::parse("b").unwrap(), NodeId::parse("c").unwrap()],
            hash: ContentHash::of(b"chunk bytes"),
            size: 11,
            redundancy_mode: RedundancyMode::Replicated,
            fragment_metadata: None,
        };
        let confirmed = vec![NodeId::parse("a").unwrap()];
        let outcome = catalog.commit_proposal(&request, ballot, &confirmed).unwrap();
        assert!(matches!(outcome, CommitOutcome::QuorumNotReached { confirmed: 1, required: 2, .. }));
    }

    #[test]
    fn repeated_commit_of_committed_chunk_is_idempotent() {
        let catalog = Catalog::open_in_memory(CoordinatorConfig::default()).unwrap();
        setup_nodes(&catalog, &["a", "b", "c"]);
        let stream_id = stream(&catalog);
        let chunk_id = ChunkId::derive(stream_id, 0);
        let request = CommitRequest {
            stream_id,
            sequence_num: 0,
            node_ids: vec![NodeId::parse("a").unwrap(), NodeId::parse("b").unwrap(), NodeId::parse("c").unwrap()],
            hash: ContentHash::of(b"chunk bytes"),
            size: 11,
            redundancy_mode: RedundancyMode::Replicated,
            fragment_metadata: None,
        };
        let confirmed = vec![NodeId::parse("a").unwrap(), NodeId::parse("b").unwrap()];

        let ballot1 = catalog.begin_proposal(&chunk_id).unwrap();
        catalog.commit_proposal(&request, ballot1, &confirmed).unwrap();

        let ballot2 = catalog.begin_proposal(&chunk_id).unwrap();
        let outcome = catalog.commit_proposal(&request, ballot2, &confirmed).unwrap();
        // immutable: still reports the original ballot, not the new one
        assert!(matches!(outcome, CommitOutcome::Committed { ballot, .. } if ballot == ballot1));
    }

    #[test]
    fn stale_ballot_is_rejected_as_conflict() {
        let catalog = Catalog::open_in_memory(CoordinatorConfig::default()).unwrap();
        setup_nodes(&catalog, &["a", "b"]);
        let stream_id = stream(&catalog);
        let chunk_id = ChunkId::derive(stream_id, 0);

        let stale_ballot = catalog.begin_proposal(&chunk_id).unwrap();
        let _fresh_ballot = catalog.begin_proposal(&chunk_id).unwrap();

        let request = CommitRequest {
            stream_id,
            sequence_num: 0,
            node_ids: vec![NodeId::parse("a").unwrap(), NodeId::parse("b").unwrap()],
            hash: ContentHash::of(b"chunk bytes"),
            size: 11,
            redundancy_mode: RedundancyMode::Replicated,
            fragment_metadata: None,
        };
        let confirmed = vec![NodeId::parse("a").unwrap(), NodeId::parse("b").unwrap()];
        let err = catalog.commit_proposal(&request, stale_ballot, &confirmed).unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }
}
