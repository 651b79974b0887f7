//! Crash-safe file replacement.
//!
//! A write goes to a temp file in the destination's own directory, is
//! synced, then renamed over the destination, and finally the directory
//! itself is synced so the rename survives power loss. Keeping the temp
//! file in the same directory keeps the rename on one filesystem.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

const TEMP_SUFFIX: &str = ".tmp";

/// Replaces `path` with whatever `write` puts into a fresh file.
///
/// If `write` or any later step fails, the temp file is removed and the
/// destination is left untouched.
pub(super) fn write_atomic<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    // Dropping the NamedTempFile on an early return deletes it.
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{stem}."))
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;

    write(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;

    tmp.persist(path).map_err(|e| e.error)?;
    fsync_dir(dir)
}

/// Convenience wrapper writing a byte buffer.
pub(super) fn write_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    write_atomic(path, |file| file.write_all(bytes))
}

/// Whether `path` looks like a temp file created by [`write_atomic`].
pub(super) fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
}

/// Syncs a directory so that entries created or renamed in it are durable.
fn fsync_dir(dir: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir)?.sync_all()
}
