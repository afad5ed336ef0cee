//! Per-document advisory locks.
//!
//! A manual `rebuild` and the watch loop must never write the same document at the same time.
//! Each document maps to a lock file under the state directory, named after a hash of its
//! absolute path, since the document itself is replaced by rename and cannot carry the lock.
//! A lock file can be released once its document is no longer watched; lockers that raced the
//! removal notice the file was replaced and retry on the new one.

use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
/// Directory holding one lock file per document.
pub struct LockDir {
    root: PathBuf,
}

impl LockDir {
    #[must_use]
    /// Uses `root` for lock files, creating it on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn lock_path(&self, document: &Path) -> PathBuf {
        let digest = Sha256::digest(document.to_string_lossy().as_bytes());
        let name = hex::encode(&digest[..8]);
        self.root.join(format!("{name}.lock"))
    }

    fn open(&self, document: &Path) -> io::Result<File> {
        fs::create_dir_all(&self.root)?;
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.lock_path(document))
    }

    /// Blocks until the lock for `document` is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be opened or locked.
    pub fn acquire(&self, document: &Path) -> io::Result<PathLock> {
        loop {
            let file = self.open(document)?;
            file.lock_exclusive()?;
            if self.is_current(document, &file)? {
                return Ok(PathLock { file });
            }
        }
    }

    /// Takes the lock for `document` if nobody else holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be opened, or locking fails for a reason other
    /// than contention.
    pub fn try_acquire(&self, document: &Path) -> io::Result<Option<PathLock>> {
        loop {
            let file = self.open(document)?;
            match file.try_lock_exclusive() {
                Ok(()) if self.is_current(document, &file)? => return Ok(Some(PathLock { file })),
                Ok(()) => {}
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Deletes the lock file for `document` if no one holds it. Returns whether it was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file exists but cannot be locked or removed.
    pub fn release(&self, document: &Path) -> io::Result<bool> {
        let path = self.lock_path(document);
        if !path.exists() {
            return Ok(false);
        }
        let Some(guard) = self.try_acquire(document)? else {
            return Ok(false);
        };
        fs::remove_file(&path)?;
        drop(guard);
        Ok(true)
    }

    /// Whether `file` is still the lock file on disk, i.e. it was not released while we waited.
    fn is_current(&self, document: &Path, file: &File) -> io::Result<bool> {
        let on_disk = match fs::metadata(self.lock_path(document)) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(same_file(&on_disk, &file.metadata()?))
    }
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_: &fs::Metadata, _: &fs::Metadata) -> bool {
    // Open files cannot be deleted here, so existence is enough.
    true
}

#[derive(Debug)]
/// Held document lock, released on drop.
pub struct PathLock {
    file: File,
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
#[path = "tests/lock.rs"]
mod tests;
