//! Stream lifecycle and manifest assembly.

use anyhow::Error;
use cds_api_types::{
    CdsError, ChunkId, ChunkLocations, ContentHash, CreateStreamRequest, FragmentLocation,
    ManifestEntry, NodeId, RedundancyMode, ReplicaLocation, StreamId, StreamManifest, StreamStatus,
    StreamSummary,
};
use rusqlite::{params, OptionalExtension};

use crate::catalog::Catalog;
use crate::convert::{enum_from_text, enum_to_text};

impl Catalog {
    pub fn create_stream(&self, request: &CreateStreamRequest) -> Result<StreamSummary, Error> {
        let stream_id = StreamId::generate();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO streams
                (stream_id, title, status, chunk_duration_secs, chunk_payload_size, total_chunk_count, popularity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                stream_id.to_string(),
                request.title,
                enum_to_text(&StreamStatus::Uploading),
                request.chunk_duration_secs,
                request.chunk_payload_size,
                request.total_chunk_count as i64,
            ],
        )?;
        log::info!("created stream {stream_id} ('{}')", request.title);

        Ok(StreamSummary {
            stream_id,
            title: request.title.clone(),
            status: StreamStatus::Uploading,
            chunk_duration_secs: request.chunk_duration_secs,
            chunk_payload_size: request.chunk_payload_size,
            total_chunk_count: request.total_chunk_count,
            committed_chunk_count: 0,
            popularity: 0,
            redundancy_mode: None,
        })
    }

    pub fn list_streams(&self) -> Result<Vec<StreamSummary>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT s.stream_id, s.title, s.status, s.chunk_duration_secs, s.chunk_payload_size,
                    s.total_chunk_count, s.popularity, s.redundancy_mode,
                    (SELECT COUNT(*) FROM chunks c WHERE c.stream_id = s.stream_id)
             FROM streams s",
        )?;
        let rows = stmt.query_map([], |row| row_to_summary(row))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    pub fn get_stream(&self, stream_id: &StreamId) -> Result<Option<StreamSummary>, Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT s.stream_id, s.title, s.status, s.chunk_duration_secs, s.chunk_payload_size,
                    s.total_chunk_count, s.popularity, s.redundancy_mode,
                    (SELECT COUNT(*) FROM chunks c WHERE c.stream_id = s.stream_id)
             FROM streams s WHERE s.stream_id = ?1",
            params![stream_id.to_string()],
            row_to_summary,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Increments the popularity counter, which is monotonically
    /// non-decreasing. Called on reader manifest access.
    pub fn record_stream_access(&self, stream_id: &StreamId) -> Result<(), CdsError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE streams SET popularity = popularity + 1 WHERE stream_id = ?1",
                params![stream_id.to_string()],
            )
            .map_err(|err| CdsError::Fatal(err.to_string()))?;
        if updated == 0 {
            return Err(CdsError::NotFound(format!("stream '{stream_id}' not found")));
        }
        Ok(())
    }

    /// Tombstones the stream. Returns the (chunk-id, node-id) pairs of
    /// every replica/fragment the caller should best-effort ask storage
    /// nodes to delete.
    pub fn delete_stream(&self, stream_id: &StreamId) -> Result<Vec<(ChunkId, NodeId)>, CdsError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE streams SET status = ?1 WHERE stream_id = ?2",
                params![enum_to_text(&StreamStatus::Deleted), stream_id.to_string()],
            )
            .map_err(|err| CdsError::Fatal(err.to_string()))?;
        if updated == 0 {
            return Err(CdsError::NotFound(format!("stream '{stream_id}' not found")));
        }

        let mut locations = Vec::new();
        let mut replica_stmt = conn
            .prepare(
                "SELECT r.chunk_id, r.node_id FROM replicas r
                 JOIN chunks c ON c.chunk_id = r.chunk_id
                 WHERE c.stream_id = ?1",
            )
            .map_err(|err| CdsError::Fatal(err.to_string()))?;
        let replica_rows = replica_stmt
            .query_map(params![stream_id.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|err| CdsError::Fatal(err.to_string()))?;
        for row in replica_rows {
            let (chunk_id, node_id) = row.map_err(|err| CdsError::Fatal(err.to_string()))?;
            locations.push((
                ChunkId::parse(chunk_id).map_err(|err| CdsError::Fatal(err.to_string()))?,
                NodeId::parse(node_id).map_err(|err| CdsError::Fatal(err.to_string()))?,
            ));
        }
        drop(replica_stmt);

        let mut fragment_stmt = conn
            .prepare(
                "SELECT f.chunk_id, f.node_id FROM fragments f
                 JOIN chunks c ON c.chunk_id = f.chunk_id
                 WHERE c.stream_id = ?1",
            )
            .map_err(|err| CdsError::Fatal(err.to_string()))?;
        let fragment_rows = fragment_stmt
            .query_map(params![stream_id.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|err| CdsError::Fatal(err.to_string()))?;
        for row in fragment_rows {
            let (chunk_id, node_id) = row.map_err(|err| CdsError::Fatal(err.to_string()))?;
            locations.push((
                ChunkId::parse(chunk_id).map_err(|err| CdsError::Fatal(err.to_string()))?,
                NodeId::parse(node_id).map_err(|err| CdsError::Fatal(err.to_string()))?,
            ));
        }

        log::info!("stream {stream_id} marked deleted, {} replica/fragment locations to reclaim", locations.len());
        Ok(locations)
    }

    /// Assembles the self-contained manifest for a stream.
    pub fn get_manifest(&self, stream_id: &StreamId) -> Result<Option<StreamManifest>, Error> {
        let summary = match self.get_stream(stream_id)? {
            Some(s) => s,
            None => return Ok(None),
        };

        let conn = self.conn.lock().unwrap();
        let mut chunk_stmt = conn.prepare(
            "SELECT chunk_id, sequence_num, size, hash, redundancy_mode FROM chunks
             WHERE stream_id = ?1 ORDER BY sequence_num ASC",
        )?;
        let chunk_rows = chunk_stmt.query_map(params![stream_id.to_string()], |row| {
            let chunk_id: String = row.get(0)?;
            let sequence_num: i64 = row.get(1)?;
            let size: i64 = row.get(2)?;
            let hash: String = row.get(3)?;
            let mode: String = row.get(4)?;
            Ok((chunk_id, sequence_num, size, hash, mode))
        })?;

        let mut entries = Vec::new();
        for row in chunk_rows {
            let (chunk_id, sequence_num, size, hash, mode) = row?;
            let chunk_id = ChunkId::parse(chunk_id)?;
            let mode: RedundancyMode = enum_from_text(&mode)?;

            let locations = match mode {
                RedundancyMode::Replicated => {
                    let mut stmt = conn.prepare(
                        "SELECT r.node_id, n.url FROM replicas r JOIN nodes n ON n.node_id = r.node_id
                         WHERE r.chunk_id = ?1 AND r.status = 'active'",
                    )?;
                    let replicas = stmt
                        .query_map(params![chunk_id.as_str()], |row| {
                            Ok(ReplicaLocation {
                                node_id: NodeId::parse(row.get::<_, String>(0)?)
                                    .unwrap_or_else(|_| NodeId::parse("unknown").unwrap()),
                                url: row.get(1)?,
                            })
                        })?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    ChunkLocations::Replicated { replicas }
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
                                node_id: NodeId::parse(row.get::<_, String>(1)?)
                                    .unwrap_or_else(|_| NodeId::parse("unknown").unwrap()),
                                url: row.get(2)?,
                                hash: hash.parse().unwrap_or_else(|_| ContentHash::of(b"")),
                                size: size as u32,
                            })
                        })?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    ChunkLocations::Erasure {
                        k: self.config.erasure_k,
                        m: self.config.erasure_m,
                        fragments,
                    }
                }
            };

            entries.push(ManifestEntry {
                chunk_id,
                sequence_num: sequence_num as u64,
                size: size as u32,
                hash: hash.parse::<ContentHash>()?,
                locations,
            });
        }

        Ok(Some(StreamManifest {
            stream_id: *stream_id,
            title: summary.title,
            status: summary.status,
            chunk_duration_secs: summary.chunk_duration_secs,
            chunk_payload_size: summary.chunk_payload_size,
            total_chunks: summary.total_chunk_count,
            entries,
        }))
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<StreamSummary> {
    let stream_id: String = row.get(0)?;
    let title: String = row.get(1)?;
    let status: String = row.get(2)?;
    let chunk_duration_secs: f64 = row.get(3)?;
    let chunk_payload_size: i64 = row.get(4)?;
    let total_chunk_count: i64 = row.get(5)?;
    let popularity: i64 = row.get(6)?;
    let redundancy_mode: Option<String> = row.get(7)?;
    let committed_chunk_count: i64 = row.get(8)?;

    Ok(StreamSummary {
        stream_id: stream_id.parse().expect("stream_id column is always valid"),
        title,
        status: enum_from_text(&status).expect("status column is always valid"),
        chunk_duration_secs,
        chunk_payload_size: chunk_payload_size as u32,
        total_chunk_count: total_chunk_count as u64,
        committed_chunk_count: committed_chunk_count as u64,
        popularity: popularity as u64,
        redundancy_mode: redundancy_mode.map(|m| enum_from_text(&m).expect("redundancy_mode column is always valid")),
    })
}
