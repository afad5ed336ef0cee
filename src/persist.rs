//! Atomic replacement of files on disk.
//!
//! Readers must never observe a half-written document or registry, so every write goes to a
//! temporary file in the destination's directory which is then renamed over the destination.

use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Writes `contents` to `path` by renaming a fully written sibling temporary file over it.
///
/// The destination's permissions are carried over when it already exists.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be created, written, synced or renamed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;

    if let Ok(metadata) = std::fs::metadata(path) {
        file.as_file().set_permissions(metadata.permissions())?;
    }

    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/persist.rs"]
mod tests;
