//! The `data/` sub-tree: an ordered sequence of append-only superblock
//! files, each capped at `S_max`.
//!
//! Adapted from `pbs-datastore::chunk_store::ChunkStore`'s digest-prefix
//! directory layout, changed from "one directory per hex prefix" to "one
//! file per ordinal" since chunks here are indexed by offset rather than
//! by filename.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Error};

const SUPERBLOCK_PREFIX: &str = "superblock_";
const SUPERBLOCK_SUFFIX: &str = ".dat";

pub struct SuperblockSet {
    data_dir: PathBuf,
    max_size: u64,
    current_ordinal: Mutex<u64>,
}

impl SuperblockSet {
    /// Opens (creating if absent) the `data/` directory under `data_dir` and
    /// resumes appends to the highest existing superblock ordinal.
    pub fn open(data_dir: PathBuf, max_size: u64) -> Result<Self, Error> {
        cds_tools::fs::create_dir_all(&data_dir)?;
        let current_ordinal = Self::scan_highest_ordinal(&data_dir)?;
        Ok(SuperblockSet {
            data_dir,
            max_size,
            current_ordinal: Mutex::new(current_ordinal),
        })
    }

    fn path_for(&self, ordinal: u64) -> PathBuf {
        self.data_dir.join(format!("{SUPERBLOCK_PREFIX}{ordinal}{SUPERBLOCK_SUFFIX}"))
    }

    fn scan_highest_ordinal(data_dir: &Path) -> Result<u64, Error> {
        let mut highest = 0u64;
        let mut found = false;
        for entry in std::fs::read_dir(data_dir)
            .with_context(|| format!("unable to list data directory {data_dir:?}"))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(ordinal) = name
                .strip_prefix(SUPERBLOCK_PREFIX)
                .and_then(|rest| rest.strip_suffix(SUPERBLOCK_SUFFIX))
                .and_then(|rest| rest.parse::<u64>().ok())
            {
                found = true;
                highest = highest.max(ordinal);
            }
        }
        if !found {
            // fresh data directory: ordinal 0 always exists once we've opened it
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(data_dir.join(format!("{SUPERBLOCK_PREFIX}0{SUPERBLOCK_SUFFIX}")))?;
        }
        Ok(highest)
    }

    /// Appends `bytes` to the current superblock, rotating to the next
    /// ordinal first if appending would exceed `max_size`. Returns the
    /// superblock ordinal and the pre-append offset the bytes now start at.
    ///
    /// Callers are expected to hold the single storage-node writer lock
    /// while calling this; `SuperblockSet` itself only serializes ordinal
    /// bookkeeping, not the append.
    pub fn append(&self, bytes: &[u8]) -> Result<(u64, u64), Error> {
        let mut ordinal = self.current_ordinal.lock().unwrap();

        let mut path = self.path_for(*ordinal);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("unable to open superblock {path:?}"))?;
        let mut offset = file.metadata()?.len();

        if offset > 0 && offset + bytes.len() as u64 > self.max_size {
            *ordinal += 1;
            path = self.path_for(*ordinal);
            file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("unable to open superblock {path:?}"))?;
            offset = 0;
        }

        file.write_all(bytes)
            .with_context(|| format!("unable to append to superblock {path:?}"))?;
        file.sync_data()
            .with_context(|| format!("unable to fsync superblock {path:?}"))?;

        Ok((*ordinal, offset))
    }

    /// Reads exactly `length` bytes starting at `offset` in superblock
    /// `ordinal`. A short read surfaces as an `Err`, which the caller turns
    /// into `corruption-detected`.
    pub fn read_at(&self, ordinal: u64, offset: u64, length: u32) -> Result<Vec<u8>, Error> {
        let path = self.path_for(ordinal);
        let mut file = File::open(&path).with_context(|| format!("unable to open superblock {path:?}"))?;
        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("unable to seek in superblock {path:?}"))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)
            .with_context(|| format!("short read from superblock {path:?} at offset {offset}"))?;
        Ok(buf)
    }

    pub fn current_ordinal(&self) -> u64 {
        *self.current_ordinal.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let set = SuperblockSet::open(dir.path().to_path_buf(), 1 << 20).unwrap();

        let (ordinal, offset) = set.append(b"hello world").unwrap();
        assert_eq!(ordinal, 0);
        assert_eq!(offset, 0);

        let (ordinal2, offset2) = set.append(b"second chunk").unwrap();
        assert_eq!(ordinal2, 0);
        assert_eq!(offset2, 11);

        assert_eq!(set.read_at(ordinal, offset, 11).unwrap(), b"hello world");
        assert_eq!(set.read_at(ordinal2, offset2, 12).unwrap(), b"second chunk");
    }

    #[test]
    fn rotates_when_exceeding_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let set = SuperblockSet::open(dir.path().to_path_buf(), 16).unwrap();

        let (ordinal1, _) = set.append(&[0u8; 10]).unwrap();
        assert_eq!(ordinal1, 0);

        // this append would push superblock 0 past 16 bytes, so it rotates
        let (ordinal2, offset2) = set.append(&[1u8; 10]).unwrap();
        assert_eq!(ordinal2, 1);
        assert_eq!(offset2, 0);
    }

    #[test]
    fn resumes_highest_ordinal_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let set = SuperblockSet::open(dir.path().to_path_buf(), 16).unwrap();
            set.append(&[0u8; 10]).unwrap();
            set.append(&[1u8; 10]).unwrap(); // rotates to ordinal 1
        }
        let reopened = SuperblockSet::open(dir.path().to_path_buf(), 16).unwrap();
        assert_eq!(reopened.current_ordinal(), 1);
    }
}
