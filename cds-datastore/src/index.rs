//! The storage node's in-memory chunk index and its on-disk snapshot.
//!
//! A chunk is identified in memory by the tuple (superblock ordinal, byte
//! offset, byte length, content hash, store timestamp). The snapshot is a
//! strict subset of durable state; it is written via write-new-file + fsync
//! + atomic-rename, matching `pbs-datastore::chunk_store`'s use of
//! `proxmox_sys::fs::replace_file`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Error;
use cds_api_types::{ChunkId, ContentHash};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexEntry {
    pub superblock_id: u64,
    pub offset: u64,
    pub length: u32,
    pub hash: ContentHash,
    pub stored_at_secs: u64,
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Default, Serialize, Deserialize)]
struct IndexSnapshot {
    entries: HashMap<String, IndexEntry>,
}

/// In-memory index guarded by a reader-writer lock: gets take only a read
/// lock and then perform disk I/O lock-free, so puts never serialize behind
/// unrelated gets.
pub struct ChunkIndex {
    entries: RwLock<HashMap<ChunkId, IndexEntry>>,
    snapshot_path: PathBuf,
}

impl ChunkIndex {
    /// Loads the snapshot at `snapshot_path` if present. A corrupt or
    /// missing snapshot starts the index empty — lost puts are acceptable
    /// since the writer will re-put or the chunk will be re-replicated.
    pub fn open(snapshot_path: PathBuf) -> Result<Self, Error> {
        let entries = if snapshot_path.exists() {
            match std::fs::read_to_string(&snapshot_path)
                .map_err(Error::from)
                .and_then(|text| serde_json::from_str::<IndexSnapshot>(&text).map_err(Error::from))
            {
                Ok(snapshot) => snapshot
                    .entries
                    .into_iter()
                    .filter_map(|(id, entry)| ChunkId::parse(id).ok().map(|id| (id, entry)))
                    .collect(),
                Err(err) => {
                    log::warn!("index snapshot {snapshot_path:?} unreadable ({err}), starting empty");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Ok(ChunkIndex {
            entries: RwLock::new(entries),
            snapshot_path,
        })
    }

    pub fn get(&self, id: &ChunkId) -> Option<IndexEntry> {
        self.entries.read().unwrap().get(id).copied()
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.entries.read().unwrap().contains_key(id)
    }

    pub fn insert(&self, id: ChunkId, entry: IndexEntry) {
        self.entries.write().unwrap().insert(id, entry);
    }

    /// Removes the entry for `id`, if any. Idempotent: returns `true` only
    /// if an entry was actually removed.
    pub fn remove(&self, id: &ChunkId) -> bool {
        self.entries.write().unwrap().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort snapshot persistence; failures are logged, never
    /// propagated, since the snapshot is allowed to lag the last put.
    pub fn persist_snapshot(&self) {
        let snapshot = IndexSnapshot {
            entries: self
                .entries
                .read()
                .unwrap()
                .iter()
                .map(|(id, entry)| (id.as_str().to_string(), *entry))
                .collect(),
        };
        let result = serde_json::to_vec_pretty(&snapshot)
            .map_err(Error::from)
            .and_then(|bytes| cds_tools::fs::replace_file(&self.snapshot_path, &bytes, true));
        if let Err(err) = result {
            log::warn!("failed to persist index snapshot {:?}: {err}", self.snapshot_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(superblock_id: u64, offset: u64) -> IndexEntry {
        IndexEntry {
            superblock_id,
            offset,
            length: 10,
            hash: ContentHash::of(b"abcdefghij"),
            stored_at_secs: now_secs(),
        }
    }

    #[test]
    fn snapshot_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("chunk_index.json");

        let index = ChunkIndex::open(snapshot_path.clone()).unwrap();
        let id = ChunkId::parse("chunk-a").unwrap();
        index.insert(id.clone(), entry(0, 0));
        index.persist_snapshot();

        let reopened = ChunkIndex::open(snapshot_path).unwrap();
        assert!(reopened.contains(&id));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = ChunkIndex::open(dir.path().join("missing.json")).unwrap();
        assert!(index.is_empty());
    }
}
