//! Small filesystem helpers.
//!
//! Follows `proxmox_sys::fs::replace_file`'s usage pattern in
//! `pbs-datastore::chunk_store::ChunkStore::insert_chunk`: write to a
//! sibling temp file, fsync it, then atomically rename it into place so a
//! reader never observes a partially written file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use anyhow::{Context, Error};

/// Atomically replace the contents of `path` with `data`.
///
/// If `fsync` is true, the new file's contents (and, best-effort, its
/// parent directory entry) are flushed to stable storage before the
/// function returns.
pub fn replace_file(path: &Path, data: &[u8], fsync: bool) -> Result<(), Error> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let tmp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        std::process::id()
    ));

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .with_context(|| format!("unable to create temp file {tmp_path:?}"))?;

    file.write_all(data)
        .with_context(|| format!("unable to write temp file {tmp_path:?}"))?;

    if fsync {
        file.sync_all()
            .with_context(|| format!("unable to fsync temp file {tmp_path:?}"))?;
    }
    drop(file);

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("unable to rename {tmp_path:?} to {path:?}"))?;

    if fsync {
        if let Ok(dir) = File::open(parent) {
            let _ = nix::unistd::fsync(dir.as_raw_fd());
        }
    }

    Ok(())
}

/// Create `path` (and any missing parents) if it does not already exist.
pub fn create_dir_all(path: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("unable to create directory {path:?}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_file_is_atomic_and_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");

        replace_file(&path, b"first", true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        replace_file(&path, b"second, longer body", true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second, longer body");

        // no stray temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }
}
