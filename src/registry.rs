//! The persisted watch registry and its polling loop.
//!
//! The registry is a typed record stored as JSON in the state directory. Several CLI invocations
//! may touch it at once (`watch`, `unwatch` and `watch --list` from different terminals, plus a
//! running `watch --run` loop), so every mutation is a read-modify-write under an advisory lock
//! that applies one logical change to the current on-disk state and replaces the file atomically.
//!
//! A watched directory is rescanned at the start of every cycle and any new document under it is
//! added. A document that was found through a directory is dropped once it is deleted, while an
//! explicitly watched one is kept and marked as failed.
//!
//! Each poll cycle walks the entries in insertion order. An unchanged document costs one read and
//! one digest; a changed one is rebuilt through the [`RebuildEngine`]. Failures are recorded on
//! the entry and retried on the next cycle; they never stop the loop.

use crate::digest::ContentDigest;
use crate::error::{RebuildError, RegistryError};
use crate::index::IndexHeader;
use crate::input;
use crate::parser;
use crate::persist;
use crate::rebuild::RebuildEngine;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// File name of the registry inside the state directory.
pub const STATE_FILE: &str = "watch.json";
const STATE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
/// Where a watched document is in its rebuild cycle.
pub enum WatchStatus {
    /// Index matches the last seen content.
    #[default]
    Idle,
    /// Content changed since the last rebuild.
    Modified,
    /// A rebuild is in progress.
    Rebuilding,
    /// The last attempt failed; see `last_error`.
    Error,
}

impl fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Modified => "modified",
            Self::Rebuilding => "rebuilding",
            Self::Error => "error",
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
/// Registry record for one watched document.
pub struct WatchEntry {
    /// Absolute document path. Stored as the registry key.
    #[serde(skip)]
    pub path: PathBuf,
    /// Content digest (`sha256:<hex>`) the index was last built from.
    #[serde(default)]
    pub last_digest: Option<String>,
    /// When the watch loop last rebuilt the document.
    #[serde(default)]
    pub last_rebuild_at: Option<DateTime<Utc>>,
    /// Current rebuild state.
    #[serde(default)]
    pub status: WatchStatus,
    /// Message of the last failure, cleared by a successful rebuild.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the document was first watched.
    pub added_at: DateTime<Utc>,
    /// Watched directory the document was found in, if it was not watched by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
/// Registry record for one watched directory.
pub struct WatchedDir {
    /// Absolute directory path. Stored as the registry key.
    #[serde(skip)]
    pub path: PathBuf,
    /// Extensions of the documents picked up under it.
    pub extensions: Vec<String>,
    /// When the directory was first watched.
    pub added_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
/// On-disk shape of the registry.
pub struct RegistryState {
    /// Schema version.
    #[serde(default)]
    pub version: u32,
    /// Watched documents keyed by absolute path, in insertion order.
    #[serde(default)]
    pub entries: IndexMap<PathBuf, WatchEntry>,
    /// Watched directories keyed by absolute path, in insertion order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dirs: IndexMap<PathBuf, WatchedDir>,
}

#[derive(Clone, Debug)]
/// Location of the persisted registry and its lock file.
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    #[must_use]
    /// A store backed by the state file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    /// A store backed by [`STATE_FILE`] inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STATE_FILE))
    }

    #[must_use]
    /// Path of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current state; a missing file is an empty registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not decode.
    pub fn load(&self) -> Result<RegistryState, RegistryError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RegistryState::default()),
            Err(e) => return Err(RegistryError::io(&self.path, e)),
        };
        let mut state: RegistryState =
            serde_json::from_slice(&bytes).map_err(|source| RegistryError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        for (path, entry) in &mut state.entries {
            entry.path.clone_from(path);
        }
        for (path, dir) in &mut state.dirs {
            dir.path.clone_from(path);
        }
        Ok(state)
    }

    /// Applies `change` to the current on-disk state and atomically writes the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be locked, read, encoded or written.
    pub fn update<R>(
        &self,
        change: impl FnOnce(&mut RegistryState) -> R,
    ) -> Result<R, RegistryError> {
        let lock = self.lock()?;
        let mut state = self.load()?;
        let result = change(&mut state);
        state.version = STATE_VERSION;
        let bytes = serde_json::to_vec_pretty(&state)?;
        persist::write_atomic(&self.path, &bytes).map_err(|e| RegistryError::io(&self.path, e))?;
        drop(lock);
        Ok(result)
    }

    fn lock(&self) -> Result<StateLock, RegistryError> {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        let lock_path = self.path.with_file_name(name);
        if let Some(dir) = lock_path.parent() {
            fs::create_dir_all(dir).map_err(|e| RegistryError::io(dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| RegistryError::io(&lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| RegistryError::io(&lock_path, e))?;
        Ok(StateLock { file })
    }
}

struct StateLock {
    file: File,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Counts of what one poll cycle did.
pub struct PollSummary {
    /// Entries examined.
    pub checked: usize,
    /// Entries whose content had not changed.
    pub unchanged: usize,
    /// Entries rebuilt successfully.
    pub rebuilt: usize,
    /// Entries that ended the cycle in [`WatchStatus::Error`].
    pub failed: usize,
    /// Entries skipped because a manual rebuild held the document lock.
    pub busy: usize,
}

enum PollOutcome {
    Unchanged,
    Rebuilt,
    Failed,
    Busy,
    Removed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// What an unwatch removed from the registry.
pub struct Unwatched {
    /// A watched directory was removed.
    pub directory: bool,
    /// Documents no longer watched, including those found in a removed directory.
    pub documents: Vec<PathBuf>,
}

impl Unwatched {
    #[must_use]
    /// True when the path was not being watched.
    pub fn is_empty(&self) -> bool {
        !self.directory && self.documents.is_empty()
    }
}

/// In-memory view of the watch registry with its mutation API.
pub struct WatchRegistry {
    store: RegistryStore,
    state: RegistryState,
}

impl WatchRegistry {
    /// Loads the registry persisted in `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file exists but cannot be read or decoded.
    pub fn open(store: RegistryStore) -> Result<Self, RegistryError> {
        let state = store.load()?;
        Ok(Self { store, state })
    }

    #[must_use]
    /// Backing store.
    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// Refreshes the in-memory view from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read or decoded.
    pub fn reload(&mut self) -> Result<(), RegistryError> {
        self.state = self.store.load()?;
        Ok(())
    }

    /// Applies `change` to the persisted state and adopts the result.
    fn update<R>(
        &mut self,
        change: impl FnOnce(&mut RegistryState) -> R,
    ) -> Result<R, RegistryError> {
        let (result, state) = self.store.update(|state| (change(state), state.clone()))?;
        self.state = state;
        Ok(result)
    }

    /// Starts watching `path`, or refreshes its digest when it is already watched.
    ///
    /// The recorded digest is the one stored in the document's index header, so a document whose
    /// index is missing or stale is rebuilt on the first poll. A document previously found through
    /// a watched directory becomes watched by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the file does not exist, or an error if the state
    /// cannot be updated.
    pub fn add(&mut self, path: &Path) -> Result<WatchEntry, RegistryError> {
        let path = canonical(path)?;
        let digest = stored_digest(&path)?;

        let entry = self.update(|state| {
            state
                .entries
                .entry(path.clone())
                .and_modify(|entry| {
                    entry.last_digest.clone_from(&digest);
                    entry.status = WatchStatus::Idle;
                    entry.last_error = None;
                    entry.dir = None;
                })
                .or_insert_with(|| WatchEntry::new(path.clone(), digest.clone(), None))
                .clone()
        })?;
        info!(path = %path.display(), "watching");
        Ok(entry)
    }

    /// Starts watching every document under `dir` with one of `extensions`, and keeps picking up
    /// new ones on each poll. Returns the entries of the documents found now.
    ///
    /// Documents that are already watched keep their state.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] or [`RegistryError::NotADirectory`] for a bad `dir`,
    /// or an error if the directory cannot be scanned or the state cannot be updated.
    pub fn add_dir(
        &mut self,
        dir: &Path,
        extensions: &[String],
    ) -> Result<Vec<WatchEntry>, RegistryError> {
        let dir = canonical(dir)?;
        if !dir.is_dir() {
            return Err(RegistryError::NotADirectory(dir));
        }
        let found = discover(&dir, extensions)?;

        let entries = self.update(|state| {
            state
                .dirs
                .entry(dir.clone())
                .and_modify(|watched| watched.extensions = extensions.to_vec())
                .or_insert_with(|| WatchedDir {
                    path: dir.clone(),
                    extensions: extensions.to_vec(),
                    added_at: Utc::now(),
                });
            found
                .into_iter()
                .map(|(path, digest)| {
                    state
                        .entries
                        .entry(path.clone())
                        .or_insert_with(|| WatchEntry::new(path, digest, Some(dir.clone())))
                        .clone()
                })
                .collect::<Vec<_>>()
        })?;
        info!(dir = %dir.display(), documents = entries.len(), "watching directory");
        Ok(entries)
    }

    /// Stops watching `path`. Unwatching a directory also drops the documents found in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be updated.
    pub fn remove(&mut self, path: &Path) -> Result<Unwatched, RegistryError> {
        let mut keys = vec![std::path::absolute(path).map_err(|e| RegistryError::io(path, e))?];
        if let Ok(canonical) = fs::canonicalize(path) {
            keys.push(canonical);
        }

        let unwatched = self.update(|state| {
            let mut unwatched = Unwatched::default();
            for key in &keys {
                if state.dirs.shift_remove(key).is_some() {
                    unwatched.directory = true;
                }
            }
            state.entries.retain(|entry_path, entry| {
                let dropped = keys.contains(entry_path)
                    || entry.dir.as_ref().is_some_and(|dir| keys.contains(dir));
                if dropped {
                    unwatched.documents.push(entry_path.clone());
                }
                !dropped
            });
            unwatched
        })?;
        if !unwatched.is_empty() {
            info!(
                path = %path.display(),
                documents = unwatched.documents.len(),
                "unwatched"
            );
        }
        Ok(unwatched)
    }

    /// Watched documents in insertion order.
    pub fn list(&self) -> impl Iterator<Item = &WatchEntry> {
        self.state.entries.values()
    }

    /// Watched directories in insertion order.
    pub fn list_dirs(&self) -> impl Iterator<Item = &WatchedDir> {
        self.state.dirs.values()
    }

    #[must_use]
    /// The entry for an absolute `path`, if watched.
    pub fn get(&self, path: &Path) -> Option<&WatchEntry> {
        self.state.entries.get(path)
    }

    #[must_use]
    /// Number of watched documents.
    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    #[must_use]
    /// True when no document or directory is watched.
    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty() && self.state.dirs.is_empty()
    }

    /// Adds documents that appeared under watched directories since the last scan.
    fn scan_dirs(&mut self) -> Result<(), RegistryError> {
        let dirs: Vec<WatchedDir> = self.state.dirs.values().cloned().collect();
        for watched in dirs {
            let found = match discover(&watched.path, &watched.extensions) {
                Ok(found) => found,
                Err(e) => {
                    warn!(dir = %watched.path.display(), error = %e, "cannot scan watched directory");
                    continue;
                }
            };
            let fresh: Vec<_> = found
                .into_iter()
                .filter(|(path, _)| !self.state.entries.contains_key(path))
                .collect();
            if fresh.is_empty() {
                continue;
            }
            self.update(|state| {
                if !state.dirs.contains_key(&watched.path) {
                    return;
                }
                for (path, digest) in fresh {
                    info!(path = %path.display(), "new document in watched directory");
                    state.entries.entry(path.clone()).or_insert_with(|| {
                        WatchEntry::new(path, digest, Some(watched.path.clone()))
                    });
                }
            })?;
        }
        Ok(())
    }

    /// Rescans watched directories, then runs one cycle over every watched document in
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be reloaded or updated. Per-document failures are
    /// recorded on the entries instead.
    pub fn poll(&mut self, engine: &RebuildEngine) -> Result<PollSummary, RegistryError> {
        self.reload()?;
        self.scan_dirs()?;
        let paths: Vec<PathBuf> = self.state.entries.keys().cloned().collect();
        let mut summary = PollSummary::default();

        for path in paths {
            let outcome = match self.poll_entry(engine, &path) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not record watch state");
                    PollOutcome::Failed
                }
            };
            let counter = match outcome {
                PollOutcome::Unchanged => &mut summary.unchanged,
                PollOutcome::Rebuilt => &mut summary.rebuilt,
                PollOutcome::Failed => &mut summary.failed,
                PollOutcome::Busy => &mut summary.busy,
                PollOutcome::Removed => continue,
            };
            *counter += 1;
            summary.checked += 1;
        }
        Ok(summary)
    }

    fn poll_entry(
        &mut self,
        engine: &RebuildEngine,
        path: &Path,
    ) -> Result<PollOutcome, RegistryError> {
        let Some((last_digest, status, from_dir)) = self
            .state
            .entries
            .get(path)
            .map(|entry| (entry.last_digest.clone(), entry.status, entry.dir.is_some()))
        else {
            return Ok(PollOutcome::Removed);
        };

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if from_dir && e.kind() == io::ErrorKind::NotFound => {
                self.update(|state| state.entries.shift_remove(path))?;
                info!(path = %path.display(), "document left watched directory");
                return Ok(PollOutcome::Removed);
            }
            Err(e) => {
                let message = if e.kind() == io::ErrorKind::NotFound {
                    "file not found".to_string()
                } else {
                    e.to_string()
                };
                return self.fail(path, message);
            }
        };
        let Some((_, content)) = parser::split_content(&text) else {
            return self.fail(path, "no ===CONTENT=== section found".to_string());
        };

        let digest = ContentDigest::compute(content);
        let seen = last_digest
            .as_deref()
            .and_then(|stored| stored.parse::<ContentDigest>().ok())
            .is_some_and(|stored| digest.matches(&stored));
        if seen && status == WatchStatus::Idle {
            return Ok(PollOutcome::Unchanged);
        }

        debug!(path = %path.display(), "change detected");
        if !self.set(path, |entry| entry.status = WatchStatus::Modified)? {
            return Ok(PollOutcome::Removed);
        }
        self.set(path, |entry| entry.status = WatchStatus::Rebuilding)?;

        match engine.try_rebuild(path) {
            Ok(report) => {
                for warning in &report.warnings {
                    warn!(path = %path.display(), "{warning}");
                }
                self.set(path, |entry| {
                    entry.status = WatchStatus::Idle;
                    entry.last_digest = Some(report.digest.to_string());
                    entry.last_rebuild_at = Some(Utc::now());
                    entry.last_error = None;
                })?;
                info!(path = %path.display(), status = ?report.status, "watched document indexed");
                Ok(PollOutcome::Rebuilt)
            }
            Err(RebuildError::Busy { .. }) => {
                self.set(path, |entry| entry.status = WatchStatus::Modified)?;
                debug!(path = %path.display(), "document locked, retrying next cycle");
                Ok(PollOutcome::Busy)
            }
            Err(e) => self.fail(path, e.to_string()),
        }
    }

    fn fail(&mut self, path: &Path, message: String) -> Result<PollOutcome, RegistryError> {
        warn!(path = %path.display(), error = %message, "watched document failed");
        self.set(path, |entry| {
            entry.status = WatchStatus::Error;
            entry.last_error = Some(message);
        })?;
        Ok(PollOutcome::Failed)
    }

    /// Applies `change` to the persisted entry for `path`, if it is still watched.
    fn set(
        &mut self,
        path: &Path,
        change: impl FnOnce(&mut WatchEntry),
    ) -> Result<bool, RegistryError> {
        self.update(|state| state.entries.get_mut(path).map(change).is_some())
    }

    /// Polls every `interval` until the registry is empty.
    ///
    /// Registry errors are logged and the cycle is retried; the loop only ends once every
    /// document and directory has been unwatched or the process is stopped.
    pub fn run(&mut self, engine: &RebuildEngine, interval: Duration) {
        loop {
            match self.poll(engine) {
                Ok(summary) => debug!(?summary, "poll cycle complete"),
                Err(e) => warn!(error = %e, "poll cycle failed, retrying"),
            }
            if self.is_empty() {
                info!("nothing left to watch");
                return;
            }
            thread::sleep(interval);
        }
    }
}

impl WatchEntry {
    fn new(path: PathBuf, last_digest: Option<String>, dir: Option<PathBuf>) -> Self {
        Self {
            path,
            last_digest,
            last_rebuild_at: None,
            status: WatchStatus::Idle,
            last_error: None,
            added_at: Utc::now(),
            dir,
        }
    }
}

fn canonical(path: &Path) -> Result<PathBuf, RegistryError> {
    fs::canonicalize(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => RegistryError::NotFound(path.to_path_buf()),
        _ => RegistryError::io(path, e),
    })
}

/// Digest recorded in the document's stored index header, if it has one.
fn stored_digest(path: &Path) -> Result<Option<String>, RegistryError> {
    let text = fs::read_to_string(path).map_err(|e| RegistryError::io(path, e))?;
    Ok(parser::split_content(&text)
        .and_then(|(head, _)| IndexHeader::parse(head))
        .map(|header| header.digest.to_string()))
}

/// Canonical paths and stored digests of the readable documents under `dir`.
fn discover(
    dir: &Path,
    extensions: &[String],
) -> Result<Vec<(PathBuf, Option<String>)>, RegistryError> {
    let found = input::find_documents(dir, extensions).map_err(|e| RegistryError::io(dir, e))?;
    let mut documents = Vec::with_capacity(found.documents.len());
    for path in found.documents {
        let read = fs::canonicalize(&path)
            .map_err(|e| RegistryError::io(&path, e))
            .and_then(|path| stored_digest(&path).map(|digest| (path, digest)));
        match read {
            Ok(document) => documents.push(document),
            Err(e) => debug!(error = %e, "skipping unreadable document"),
        }
    }
    Ok(documents)
}

#[cfg(test)]
#[path = "tests/registry.rs"]
mod tests;
