//! `ChunkStore`: the storage node's public operations —
//! `put`/`get`/`head`/`delete`/`probe`/`health` — built on top of
//! [`crate::superblock::SuperblockSet`] and [`crate::index::ChunkIndex`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::Error;
use cds_api_types::{CdsError, ChunkId, ChunkLocation, ContentHash, HealthReport, HealthStatus, ProbeInfo, PutOutcome};

use crate::index::{now_secs, ChunkIndex, IndexEntry};
use crate::superblock::SuperblockSet;

/// Threshold of consecutive failed-persistence events above which health
/// degrades from `warning` to `critical`.
const CRITICAL_FAILED_PERSISTENCE: u64 = 5;

pub struct ChunkStore {
    node_id: String,
    data_dir: PathBuf,
    superblocks: SuperblockSet,
    index: ChunkIndex,
    /// The single writer lock: serializes superblock append/rotation and
    /// the delete path against each other, so a delete can never race a put
    /// for the same id.
    writer_lock: Mutex<()>,
    max_payload_size: u32,
    warn_threshold: f64,
    crit_threshold: f64,
    failed_persistence: AtomicU64,
    started_at: Instant,
}

impl ChunkStore {
    pub fn open(config: &cds_config::StorageNodeConfig) -> Result<Self, Error> {
        cds_tools::fs::create_dir_all(&config.data_dir)?;
        let data_subdir = config.data_dir.join("data");
        let index_subdir = config.data_dir.join("index");
        cds_tools::fs::create_dir_all(&index_subdir)?;

        let superblocks = SuperblockSet::open(data_subdir, config.max_superblock_size)?;
        let index = ChunkIndex::open(index_subdir.join("chunk_index.json"))?;

        Ok(ChunkStore {
            node_id: config.node_id.clone(),
            data_dir: config.data_dir.clone(),
            superblocks,
            index,
            writer_lock: Mutex::new(()),
            max_payload_size: config.max_payload_size,
            warn_threshold: config.warn_threshold,
            crit_threshold: config.crit_threshold,
            failed_persistence: AtomicU64::new(0),
            started_at: Instant::now(),
        })
    }

    /// Idempotent: a second put of the same `(chunk_id, data)` pair is a
    /// no-op that returns the already-stored hash. A second put of the same
    /// `chunk_id` with *different* bytes is rejected as `integrity-mismatch`
    /// (strict content-addressability once a chunk-id is committed).
    pub fn put(&self, chunk_id: &ChunkId, data: &[u8], expected_hash: Option<&ContentHash>) -> Result<PutOutcome, CdsError> {
        if data.is_empty() {
            return Err(CdsError::BadRequest("empty chunk body".to_string()));
        }
        if data.len() > self.max_payload_size as usize {
            return Err(CdsError::BadRequest(format!(
                "chunk body of {} bytes exceeds payload ceiling of {} bytes",
                data.len(),
                self.max_payload_size
            )));
        }

        let hash = ContentHash::of(data);
        if let Some(expected) = expected_hash {
            if expected != &hash {
                return Err(CdsError::IntegrityMismatch(format!(
                    "expected hash {expected}, computed {hash}"
                )));
            }
        }

        if let Some(existing) = self.check_idempotent(chunk_id, &hash)? {
            return Ok(existing);
        }

        if self.disk_usage_fraction() >= self.crit_threshold {
            return Err(CdsError::CapacityExhausted(
                "disk usage at or above critical threshold".to_string(),
            ));
        }

        let _writer_guard = self.writer_lock.lock().unwrap();

        // re-check idempotency under the writer lock: another put for this
        // id may have committed between the check above and acquiring the lock
        if let Some(existing) = self.check_idempotent(chunk_id, &hash)? {
            return Ok(existing);
        }

        let (superblock_id, offset) = self.superblocks.append(data).map_err(|err| {
            self.failed_persistence.fetch_add(1, Ordering::SeqCst);
            CdsError::StorageFault(err.to_string())
        })?;

        let entry = IndexEntry {
            superblock_id,
            offset,
            length: data.len() as u32,
            hash,
            stored_at_secs: now_secs(),
        };
        self.index.insert(chunk_id.clone(), entry);
        self.index.persist_snapshot();

        log::debug!("put chunk {chunk_id} ({} bytes) into superblock {superblock_id}@{offset}", entry.length);

        Ok(PutOutcome {
            hash,
            size: entry.length,
            created: true,
        })
    }

    /// Returns `Ok(Some(outcome))` if `chunk_id` is already present; `Err`
    /// if it is present with different content; `Ok(None)` if absent.
    fn check_idempotent(&self, chunk_id: &ChunkId, hash: &ContentHash) -> Result<Option<PutOutcome>, CdsError> {
        match self.index.get(chunk_id) {
            Some(existing) if &existing.hash == hash => Ok(Some(PutOutcome {
                hash: existing.hash,
                size: existing.length,
                created: false,
            })),
            Some(existing) => Err(CdsError::IntegrityMismatch(format!(
                "chunk id '{chunk_id}' already stored with hash {} (computed {hash})",
                existing.hash
            ))),
            None => Ok(None),
        }
    }

    pub fn get(&self, chunk_id: &ChunkId) -> Result<(Vec<u8>, ContentHash), CdsError> {
        let entry = self
            .index
            .get(chunk_id)
            .ok_or_else(|| CdsError::NotFound(format!("chunk '{chunk_id}' not found")))?;

        let bytes = self
            .superblocks
            .read_at(entry.superblock_id, entry.offset, entry.length)
            .map_err(|err| CdsError::CorruptionDetected(format!("read failed for chunk '{chunk_id}': {err}")))?;

        let hash = ContentHash::of(&bytes);
        if hash != entry.hash {
            log::error!("hash mismatch reading chunk {chunk_id}: expected {}, got {hash}", entry.hash);
            return Err(CdsError::CorruptionDetected(format!(
                "hash mismatch for chunk '{chunk_id}': expected {}, got {hash}",
                entry.hash
            )));
        }

        Ok((bytes, hash))
    }

    pub fn head(&self, chunk_id: &ChunkId) -> Result<ChunkLocation, CdsError> {
        let entry = self
            .index
            .get(chunk_id)
            .ok_or_else(|| CdsError::NotFound(format!("chunk '{chunk_id}' not found")))?;
        Ok(ChunkLocation {
            superblock_id: entry.superblock_id,
            offset: entry.offset,
            length: entry.length,
        })
    }

    /// Idempotent: succeeds (no-op) if `chunk_id` is already absent. Takes
    /// the writer lock so a delete can never observe a half-written put.
    pub fn delete(&self, chunk_id: &ChunkId) -> Result<(), CdsError> {
        let _writer_guard = self.writer_lock.lock().unwrap();
        if self.index.remove(chunk_id) {
            self.index.persist_snapshot();
            log::debug!("deleted chunk {chunk_id}");
        }
        Ok(())
    }

    /// Minimal-latency status: no superblock I/O, just the index length and
    /// a `statvfs` syscall against the data directory.
    pub fn probe(&self) -> ProbeInfo {
        ProbeInfo {
            node_id: self.node_id.clone(),
            disk_usage_fraction: self.disk_usage_fraction(),
            chunk_count: self.index.len() as u64,
        }
    }

    /// Payload ceiling above which `put` rejects a body as too large with
    /// `413`. Exposed so the HTTP edge can return `413` directly instead of
    /// the generic `400` `bad-request` mapping.
    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }

    pub fn health(&self) -> HealthReport {
        let disk_usage = self.disk_usage_fraction();
        let failed = self.failed_persistence.load(Ordering::SeqCst);

        let status = if disk_usage >= self.crit_threshold || failed > CRITICAL_FAILED_PERSISTENCE {
            HealthStatus::Critical
        } else if disk_usage >= self.warn_threshold || failed > 0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            disk_usage,
            chunk_count: self.index.len() as u64,
            uptime_secs: self.started_at.elapsed().as_secs(),
            node_id: self.node_id.clone(),
        }
    }

    fn disk_usage_fraction(&self) -> f64 {
        match nix::sys::statvfs::statvfs(&self.data_dir) {
            Ok(stat) => {
                let block_size = stat.fragment_size().max(1) as f64;
                let total = stat.blocks() as f64 * block_size;
                let free = stat.blocks_available() as f64 * block_size;
                if total <= 0.0 {
                    0.0
                } else {
                    (1.0 - (free / total)).clamp(0.0, 1.0)
                }
            }
            Err(err) => {
                log::warn!("statvfs({:?}) failed: {err}", self.data_dir);
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cds_config::StorageNodeConfig;

    fn store(dir: &std::path::Path) -> ChunkStore {
        let config = StorageNodeConfig {
            node_id: "node-test".to_string(),
            data_dir: dir.to_path_buf(),
            max_payload_size: 1024,
            ..StorageNodeConfig::default()
        };
        ChunkStore::open(&config).unwrap()
    }

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = ChunkId::parse("chunk-1").unwrap();

        let outcome = store.put(&id, b"payload bytes", None).unwrap();
        assert!(outcome.created);

        let (bytes, hash) = store.get(&id).unwrap();
        assert_eq!(bytes, b"payload bytes");
        assert_eq!(hash, outcome.hash);
    }

    #[test]
    fn put_is_idempotent_for_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = ChunkId::parse("chunk-1").unwrap();

        let first = store.put(&id, b"payload", None).unwrap();
        assert!(first.created);
        let second = store.put(&id, b"payload", None).unwrap();
        assert!(!second.created);
        assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn put_rejects_distinct_body_for_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = ChunkId::parse("chunk-1").unwrap();

        store.put(&id, b"first body", None).unwrap();
        let err = store.put(&id, b"a different body", None).unwrap_err();
        assert_eq!(err.kind(), "integrity-mismatch");
    }

    #[test]
    fn put_rejects_empty_and_oversize_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = ChunkId::parse("chunk-1").unwrap();

        assert_eq!(store.put(&id, b"", None).unwrap_err().kind(), "bad-request");
        assert_eq!(
            store.put(&id, &vec![0u8; 2048], None).unwrap_err().kind(),
            "bad-request"
        );
    }

    #[test]
    fn put_checks_expected_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = ChunkId::parse("chunk-1").unwrap();
        let wrong_hash = ContentHash::of(b"not the body");

        let err = store.put(&id, b"the actual body", Some(&wrong_hash)).unwrap_err();
        assert_eq!(err.kind(), "integrity-mismatch");
    }

    #[test]
    fn get_on_missing_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = ChunkId::parse("missing").unwrap();
        assert_eq!(store.get(&id).unwrap_err().kind(), "not-found");
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = ChunkId::parse("chunk-1").unwrap();

        store.put(&id, b"payload", None).unwrap();
        store.delete(&id).unwrap();
        assert_eq!(store.get(&id).unwrap_err().kind(), "not-found");
        // deleting again is a no-op, not an error
        store.delete(&id).unwrap();
    }

    #[test]
    fn head_reports_location_without_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = ChunkId::parse("chunk-1").unwrap();

        let outcome = store.put(&id, b"twelve bytes", None).unwrap();
        let location = store.head(&id).unwrap();
        assert_eq!(location.length, outcome.size);
    }

    #[test]
    fn probe_and_health_report_chunk_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = ChunkId::parse("chunk-1").unwrap();
        store.put(&id, b"payload", None).unwrap();

        assert_eq!(store.probe().chunk_count, 1);
        let health = store.health();
        assert_eq!(health.chunk_count, 1);
        assert_eq!(health.status, HealthStatus::Healthy);
    }
}
