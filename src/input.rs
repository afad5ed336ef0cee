//! Document discovery on disk.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Default)]
/// Documents found under a root, plus the entries that could not be walked.
pub struct Discovery {
    /// Matching documents, sorted by path.
    pub documents: Vec<PathBuf>,
    /// Matching paths or directories the walk could not enter, sorted by path.
    pub failures: Vec<(PathBuf, io::Error)>,
}

/// Finds documents under `root` whose extension is one of `extensions`.
///
/// A `root` that is itself a file is returned as-is when its extension matches. A broken entry
/// below `root` (a dangling symlink, an unreadable directory) is recorded in
/// [`Discovery::failures`] and the walk carries on. Broken entries that could not have been a
/// document, and symlink loops, are skipped.
///
/// # Errors
///
/// Returns an error only if `root` does not exist.
pub fn find_documents(root: &Path, extensions: &[String]) -> io::Result<Discovery> {
    if !root.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("directory not found: {}", root.display()),
        ));
    }

    let mut found = Discovery::default();
    for entry in WalkDir::new(root).follow_links(true) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
                    found.documents.push(entry.into_path());
                }
            }
            Err(e) if e.loop_ancestor().is_some() => {
                debug!(error = %e, "skipping symlink loop");
            }
            Err(e) => {
                let path = e.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
                if !path.is_dir() && !has_extension(&path, extensions) {
                    debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
                warn!(path = %path.display(), error = %e, "cannot read entry");
                found.failures.push((path, io::Error::from(e)));
            }
        }
    }
    found.documents.sort();
    found.failures.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
}

#[cfg(test)]
#[path = "tests/input.rs"]
mod tests;
