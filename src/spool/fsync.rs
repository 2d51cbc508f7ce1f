//! Durable file writes for the spool.
//!
//! A rename or unlink is only durable once the parent directory has been
//! synced, so every directory-entry change below ends with [`fsync_dir`].

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory's entries to disk.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir_path)?.sync_all()
}

/// Replaces `path` with `bytes` so that a crash leaves either the old file or
/// the new one, never a torn write.
///
/// Writes `tmp`, syncs it, renames it over `path` and syncs `dir`.
pub fn write_atomic(dir: &Path, tmp: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp)?;
        file.write_all(bytes)?;
        fsync_file(&file)?;
    }
    std::fs::rename(tmp, path)?;
    fsync_dir(dir)
}
