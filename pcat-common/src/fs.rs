//! Atomic file replacement
//!
//! Writers stage bytes in a temporary file beside the destination and rename
//! it into place, so readers observe either the old file or the new one and a
//! crash mid-write never leaves a truncated destination behind.

use crate::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replace `dest` with `bytes`
///
/// Creates missing parent directories. The temporary file lives in the same
/// directory as `dest` so the final rename never crosses filesystems.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(dest).map_err(|e| e.error)?;

    tracing::debug!(path = %dest.display(), bytes = bytes.len(), "File replaced atomically");
    Ok(())
}
