//! Redundancy-mode recommendation, manual override, and storage-overhead
//! reporting.

use anyhow::Error;
use cds_api_types::{
    CdsError, RedundancyMode, RedundancyRecommendation, StorageOverheadReport, StreamEfficiency, StreamId,
};
use rusqlite::{params, OptionalExtension};

use crate::catalog::Catalog;
use crate::convert::{enum_from_text, enum_to_text};

impl Catalog {
    /// Popularity-driven recommendation, alongside any manual override and
    /// the mode actually frozen at first commit, if the stream has
    /// committed chunks yet.
    pub fn recommend_redundancy(&self, stream_id: &StreamId) -> Result<Option<RedundancyRecommendation>, Error> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT popularity, redundancy_override, redundancy_mode FROM streams WHERE stream_id = ?1",
                params![stream_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((popularity, manual_override, effective_mode)) = row else {
            return Ok(None);
        };
        let manual_override = manual_override
            .map(|m| enum_from_text::<RedundancyMode>(&m))
            .transpose()?;
        let effective_mode = effective_mode
            .map(|m| enum_from_text::<RedundancyMode>(&m))
            .transpose()?;

        let popularity_based = if popularity as u64 > self.config.popularity_threshold {
            RedundancyMode::Replicated
        } else {
            RedundancyMode::Erasure
        };
        let recommended_mode = manual_override.unwrap_or(popularity_based);

        Ok(Some(RedundancyRecommendation {
            stream_id: *stream_id,
            popularity: popularity as u64,
            recommended_mode,
            manual_override,
            effective_mode,
        }))
    }

    pub fn set_redundancy_override(&self, stream_id: &StreamId, mode: RedundancyMode) -> Result<(), CdsError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE streams SET redundancy_override = ?1 WHERE stream_id = ?2",
                params![enum_to_text(&mode), stream_id.to_string()],
            )
            .map_err(|err| CdsError::Fatal(err.to_string()))?;
        if updated == 0 {
            return Err(CdsError::NotFound(format!("stream '{stream_id}' not found")));
        }
        Ok(())
    }

    pub fn clear_redundancy_override(&self, stream_id: &StreamId) -> Result<(), CdsError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE streams SET redundancy_override = NULL WHERE stream_id = ?1",
                params![stream_id.to_string()],
            )
            .map_err(|err| CdsError::Fatal(err.to_string()))?;
        if updated == 0 {
            return Err(CdsError::NotFound(format!("stream '{stream_id}' not found")));
        }
        Ok(())
    }

    /// `(physical stored bytes) / (logical payload bytes)` per stream and
    /// overall: `R` for replicated, `N/K` for erasure.
    pub fn storage_overhead_report(&self) -> Result<StorageOverheadReport, Error> {
        let conn = self.conn.lock().unwrap();

        // per-chunk physical size: size * replica count (replicated mode) or
        // the sum of its fragment sizes (erasure mode)
        let mut stmt = conn.prepare(
            "SELECT c.stream_id, c.redundancy_mode, c.size,
                    (SELECT COUNT(*) FROM replicas r WHERE r.chunk_id = c.chunk_id) AS replica_count,
                    (SELECT COALESCE(SUM(f.size), 0) FROM fragments f WHERE f.chunk_id = c.chunk_id) AS fragment_bytes
             FROM chunks c",
        )?;

        let rows = stmt.query_map([], |row| {
            let stream_id: String = row.get(0)?;
            let mode: String = row.get(1)?;
            let size: i64 = row.get(2)?;
            let replica_count: i64 = row.get(3)?;
            let fragment_bytes: i64 = row.get(4)?;
            Ok((stream_id, mode, size, replica_count, fragment_bytes))
        })?;

        let mut per_stream: std::collections::HashMap<String, (RedundancyMode, u64, u64)> = std::collections::HashMap::new();

        for row in rows {
            let (stream_id, mode, size, replica_count, fragment_bytes) = row?;
            let mode: RedundancyMode = enum_from_text(&mode)?;
            let physical = match mode {
                RedundancyMode::Replicated => size as u64 * replica_count.max(0) as u64,
                RedundancyMode::Erasure => fragment_bytes as u64,
            };
            let entry = per_stream.entry(stream_id).or_insert((mode, 0, 0));
            entry.1 += size as u64;
            entry.2 += physical;
        }

        let mut total_logical = 0u64;
        let mut total_physical = 0u64;
        let mut efficiencies = Vec::new();

        for (stream_id, (mode, logical_bytes, physical_bytes)) in per_stream {
            total_logical += logical_bytes;
            total_physical += physical_bytes;
            let overhead_ratio = if logical_bytes == 0 {
                0.0
            } else {
                physical_bytes as f64 / logical_bytes as f64
            };
            efficiencies.push(StreamEfficiency {
                stream_id: stream_id.parse().expect("stream_id column is always valid"),
                mode,
                overhead_ratio,
            });
        }

        let overhead_ratio = if total_logical == 0 {
            0.0
        } else {
            total_physical as f64 / total_logical as f64
        };

        Ok(StorageOverheadReport {
            logical_bytes: total_logical,
            physical_bytes: total_physical,
            overhead_ratio,
            per_stream: efficiencies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cds_config::CoordinatorConfig;
    use cds_api_types::CreateStreamRequest;

    #[test]
    fn recommendation_defaults_to_erasure_below_threshold() {
        let catalog = Catalog::open_in_memory(CoordinatorConfig::default()).unwrap();
        let summary = catalog
            .create_stream(&CreateStreamRequest {
                title: "s".to_string(),
                chunk_duration_secs: 10.0,
                chunk_payload_size: 1 << 21,
                total_chunk_count: 1,
            })
            .unwrap();

        let recommendation = catalog.recommend_redundancy(&summary.stream_id).unwrap().unwrap();
        assert_eq!(recommendation.recommended_mode, RedundancyMode::Erasure);
        assert!(recommendation.manual_override.is_none());
    }

    #[test]
    fn manual_override_supersedes_popularity() {
        let catalog = Catalog::open_in_memory(CoordinatorConfig::default()).unwrap();
        let summary = catalog
            .create_stream(&CreateStreamRequest {
                title: "s".to_string(),
                chunk_duration_secs: 10.0,
                chunk_payload_size: 1 << 21,
                total_chunk_count: 1,
            })
            .unwrap();

        catalog
            .set_redundancy_override(&summary.stream_id, RedundancyMode::Replicated)
            .unwrap();
        let recommendation = catalog.recommend_redundancy(&summary.stream_id).unwrap().unwrap();
        assert_eq!(recommendation.recommended_mode, RedundancyMode::Replicated);

        catalog.clear_redundancy_override(&summary.stream_id).unwrap();
        let recommendation = catalog.recommend_redundancy(&summary.stream_id).unwrap().unwrap();
        assert_eq!(recommendation.recommended_mode, RedundancyMode::Erasure);
    }
}
