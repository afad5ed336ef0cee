//! The rebuild engine: parse, hash-compare, validate, regenerate and atomically write.
//!
//! A rebuild moves through a fixed sequence of states:
//!
//! ```text
//! Parsed -> Hashed -> UpToDate                      (no write)
//!                  \-> StaleRebuild -> Validated -> Written
//! any step -> Failed                                (file untouched)
//! ```
//!
//! The generated index is spliced in front of the untouched content block. Since the number of
//! lines in the index does not depend on the line numbers written into it, the section
//! coordinates only need to be shifted once by the difference between the old and the new first
//! content line.
//!
//! Reference errors never stop a rebuild; they are carried on the report so callers can tell a
//! clean rebuild from one with warnings.

use crate::digest::ContentDigest;
use crate::error::{RebuildError, ReferenceError};
use crate::index::{self, IndexHeader};
use crate::input;
use crate::lock::{LockDir, PathLock};
use crate::parser::{self, CONTENT_MARKER, INDEX_MARKER};
use crate::persist;
use crate::references;
use crate::section::{Document, IndexEntry};
use chrono::{SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// What a successful rebuild did to the file.
pub enum RebuildStatus {
    /// The stored index already matched the content; nothing was written.
    UpToDate,
    /// A fresh index was generated and written.
    Rebuilt,
}

#[derive(Clone, Debug)]
/// Outcome of a successful rebuild.
pub struct RebuildReport {
    /// Document that was processed.
    pub path: PathBuf,
    /// Whether the file was rewritten.
    pub status: RebuildStatus,
    /// Digest of the content block now recorded in the index.
    pub digest: ContentDigest,
    /// Number of indexed sections.
    pub section_count: usize,
    /// Dangling cross-references found along the way.
    pub warnings: Vec<ReferenceError>,
}

impl RebuildReport {
    #[must_use]
    /// True when no reference warnings were raised.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Default)]
/// Per-file results of a directory rebuild.
pub struct BatchReport {
    /// Each matching file with its outcome, in path order.
    pub results: Vec<(PathBuf, Result<RebuildReport, RebuildError>)>,
}

impl BatchReport {
    #[must_use]
    /// Number of files that failed outright.
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_err()).count()
    }

    #[must_use]
    /// Number of files rebuilt or already current, with or without warnings.
    pub fn succeeded(&self) -> usize {
        self.results.len() - self.failed()
    }

    #[must_use]
    /// True when every file succeeded without reference warnings.
    pub fn is_clean(&self) -> bool {
        self.results
            .iter()
            .all(|(_, r)| r.as_ref().is_ok_and(RebuildReport::is_clean))
    }
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
/// Index consistency problem that does not make a document invalid.
pub enum IndexWarning {
    /// The document has never been indexed.
    #[error("No INDEX section (run 'iatf rebuild' to create)")]
    NoIndex,
    /// The index header has no usable content digest.
    #[error("INDEX missing Content-Hash (run 'iatf rebuild' to add)")]
    MissingDigest,
    /// The content changed since the index was generated.
    #[error("INDEX Content-Hash does not match CONTENT (index may be stale)")]
    StaleDigest,
    /// A content section has no index entry.
    #[error("CONTENT section missing from INDEX: {0}")]
    MissingEntry(String),
    /// An index entry names a section that no longer exists.
    #[error("INDEX references missing CONTENT section: {0}")]
    OrphanEntry(String),
    /// An index entry points at the wrong lines.
    #[error("INDEX line range mismatch for section: {0}")]
    RangeMismatch(String),
}

#[derive(Clone, Debug)]
/// Result of a read-only validation.
pub struct ValidationReport {
    /// Document that was checked.
    pub path: PathBuf,
    /// Number of sections found.
    pub section_count: usize,
    /// Dangling cross-references; any of these makes the document invalid.
    pub reference_errors: Vec<ReferenceError>,
    /// Index staleness findings.
    pub warnings: Vec<IndexWarning>,
}

impl ValidationReport {
    #[must_use]
    /// True when there are no reference errors.
    pub fn is_valid(&self) -> bool {
        self.reference_errors.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
/// Runs rebuilds, serialising writers of the same document through optional path locks.
pub struct RebuildEngine {
    locks: Option<LockDir>,
}

impl RebuildEngine {
    #[must_use]
    /// An engine that does not coordinate with other processes.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    /// An engine that locks each document through `locks` while rebuilding it.
    pub fn with_locks(locks: LockDir) -> Self {
        Self { locks: Some(locks) }
    }

    /// Rebuilds the index of `path`, waiting for any concurrent rebuild of the same file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or written. The file is untouched on
    /// error.
    pub fn rebuild(&self, path: &Path) -> Result<RebuildReport, RebuildError> {
        let _guard = self.lock(path, true)?;
        rebuild_unlocked(path)
    }

    /// Rebuilds the index of `path` unless another rebuild of it is in progress.
    ///
    /// # Errors
    ///
    /// Returns [`RebuildError::Busy`] when the document is locked, otherwise as
    /// [`RebuildEngine::rebuild`].
    pub fn try_rebuild(&self, path: &Path) -> Result<RebuildReport, RebuildError> {
        let _guard = self.lock(path, false)?;
        rebuild_unlocked(path)
    }

    fn lock(&self, path: &Path, wait: bool) -> Result<Option<PathLock>, RebuildError> {
        let Some(locks) = &self.locks else {
            return Ok(None);
        };
        let key = lock_key(path)?;
        if wait {
            return locks
                .acquire(&key)
                .map(Some)
                .map_err(|e| RebuildError::io(path, e));
        }
        match locks.try_acquire(&key) {
            Ok(Some(guard)) => Ok(Some(guard)),
            Ok(None) => Err(RebuildError::Busy {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(RebuildError::io(path, e)),
        }
    }

    #[must_use]
    /// Rebuilds every file under `dir` with one of `extensions`, continuing past failures.
    ///
    /// Entries the directory walk could not read are reported as failed files alongside the
    /// rebuild results, in path order.
    pub fn rebuild_all(&self, dir: &Path, extensions: &[String]) -> BatchReport {
        let found = match input::find_documents(dir, extensions) {
            Ok(found) => found,
            Err(e) => {
                return BatchReport {
                    results: vec![(dir.to_path_buf(), Err(RebuildError::io(dir, e)))],
                }
            }
        };

        let mut results: Vec<_> = found
            .documents
            .into_iter()
            .map(|file| {
                let outcome = self.rebuild(&file);
                if let Err(e) = &outcome {
                    debug!(path = %file.display(), error = %e, "rebuild failed");
                }
                (file, outcome)
            })
            .collect();
        results.extend(
            found
                .failures
                .into_iter()
                .map(|(path, e)| (path.clone(), Err(RebuildError::io(path, e)))),
        );
        results.sort_by(|a, b| a.0.cmp(&b.0));
        BatchReport { results }
    }

    /// Removes the lock file of `path` unless a rebuild currently holds it. Returns whether a
    /// lock file was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file exists but cannot be removed.
    pub fn forget(&self, path: &Path) -> Result<bool, RebuildError> {
        let Some(locks) = &self.locks else {
            return Ok(false);
        };
        let key = lock_key(path)?;
        locks.release(&key).map_err(|e| RebuildError::io(path, e))
    }
}

fn lock_key(path: &Path) -> Result<PathBuf, RebuildError> {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .map_err(|e| RebuildError::io(path, e))
}

fn read(path: &Path) -> Result<String, RebuildError> {
    fs::read_to_string(path).map_err(|e| RebuildError::io(path, e))
}

fn parse(path: &Path, text: &str) -> Result<Document, RebuildError> {
    parser::parse_document(text).map_err(|source| RebuildError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn rebuild_unlocked(path: &Path) -> Result<RebuildReport, RebuildError> {
    let raw = read(path)?;
    let mut document = parse(path, &raw)?;
    debug!(path = %path.display(), sections = document.sections.len(), "parsed");

    let digest = ContentDigest::compute(&document.content_block);
    let stored = IndexHeader::parse(&document.index_block);

    let entries = relocate(&mut document);
    let warnings = references::validate_references(&document);
    for warning in &warnings {
        debug!(path = %path.display(), "{warning}");
    }

    let report = |status| RebuildReport {
        path: path.to_path_buf(),
        status,
        digest: digest.clone(),
        section_count: entries.len(),
        warnings: warnings.clone(),
    };

    if let Some(stored) = stored.filter(|s| digest.matches(&s.digest)) {
        let header = IndexHeader {
            generated: stored.generated,
            digest: digest.clone(),
        };
        if render(&document, &header, &entries) == raw {
            debug!(path = %path.display(), "index up to date");
            return Ok(report(RebuildStatus::UpToDate));
        }
    }

    let header = IndexHeader {
        generated: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        digest: digest.clone(),
    };
    let output = render(&document, &header, &entries);
    persist::write_atomic(path, output.as_bytes()).map_err(|e| RebuildError::io(path, e))?;
    info!(path = %path.display(), sections = entries.len(), "index rebuilt");
    Ok(report(RebuildStatus::Rebuilt))
}

/// First content line of the rebuilt file.
///
/// Layout: preamble, blank, index marker, index block, content marker.
fn content_first_line(document: &Document, index_lines: usize) -> usize {
    document.preamble.len() + 1 + 1 + index_lines + 1 + 1
}

fn relocate(document: &mut Document) -> Vec<IndexEntry> {
    let draft: Vec<IndexEntry> = document.sections.iter().map(IndexEntry::from).collect();
    let index_lines = index::HEADER_LINES + index::render_entries(&draft).len();
    document.relocate_content(content_first_line(document, index_lines));
    document.sections.iter().map(IndexEntry::from).collect()
}

fn render(document: &Document, header: &IndexHeader, entries: &[IndexEntry]) -> String {
    let eol = document.line_ending.as_str();
    let mut out = String::with_capacity(document.content_block.len() + 4096);
    for line in &document.preamble {
        out.push_str(line);
        out.push_str(eol);
    }
    out.push_str(eol);
    out.push_str(INDEX_MARKER);
    out.push_str(eol);
    for line in index::render_index(header, entries) {
        out.push_str(&line);
        out.push_str(eol);
    }
    out.push_str(CONTENT_MARKER);
    out.push_str(eol);
    out.push_str(&document.content_block);
    out
}

/// Parses `path` and checks references and index consistency without writing.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is structurally invalid.
pub fn validate(path: &Path) -> Result<ValidationReport, RebuildError> {
    let raw = read(path)?;
    let document = parse(path, &raw)?;
    let reference_errors = references::validate_references(&document);

    let mut warnings = Vec::new();
    let has_index = raw
        .lines()
        .take_while(|line| line.trim() != CONTENT_MARKER)
        .any(|line| line.trim() == INDEX_MARKER);
    if has_index {
        match IndexHeader::parse(&document.index_block) {
            None => warnings.push(IndexWarning::MissingDigest),
            Some(header) => {
                if !ContentDigest::compute(&document.content_block).matches(&header.digest) {
                    warnings.push(IndexWarning::StaleDigest);
                }
            }
        }
        warnings.extend(entry_warnings(&document));
    } else {
        warnings.push(IndexWarning::NoIndex);
    }

    Ok(ValidationReport {
        path: path.to_path_buf(),
        section_count: document.sections.len(),
        reference_errors,
        warnings,
    })
}

fn entry_warnings(document: &Document) -> Vec<IndexWarning> {
    let stored = index::parse_entries(&document.index_block);
    let mut warnings = Vec::new();
    for section in &document.sections {
        match stored.iter().find(|e| e.id == section.id) {
            None => warnings.push(IndexWarning::MissingEntry(section.id.clone())),
            Some(entry)
                if (entry.line_start, entry.line_end)
                    != (section.line_start, section.line_end) =>
            {
                warnings.push(IndexWarning::RangeMismatch(section.id.clone()));
            }
            Some(_) => {}
        }
    }
    for entry in &stored {
        if document.section(&entry.id).is_none() {
            warnings.push(IndexWarning::OrphanEntry(entry.id.clone()));
        }
    }
    warnings
}

#[cfg(test)]
#[path = "tests/rebuild.rs"]
mod tests;
