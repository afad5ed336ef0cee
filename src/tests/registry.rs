use super::{RegistryStore, WatchRegistry, WatchStatus, STATE_FILE};
use crate::error::RegistryError;
use crate::lock::LockDir;
use crate::rebuild::RebuildEngine;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const SAMPLE: &str = "\
:::IATF
@title: Watched

===CONTENT===
{#only}
@summary: The only section
# Only
Some words.
{/only}
";

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn store(&self) -> RegistryStore {
        RegistryStore::in_dir(&self.dir.path().join("state"))
    }

    fn registry(&self) -> WatchRegistry {
        WatchRegistry::open(self.store()).unwrap()
    }

    fn engine(&self) -> RebuildEngine {
        RebuildEngine::with_locks(LockDir::new(self.dir.path().join("state").join("locks")))
    }

    fn docs_dir(&self) -> PathBuf {
        let path = self.dir.path().join("docs");
        fs::create_dir_all(&path).unwrap();
        fs::canonicalize(path).unwrap()
    }

    fn doc(&self, name: &str, text: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, text).unwrap();
        fs::canonicalize(path).unwrap()
    }
}

#[test]
fn test_empty_registry_without_state_file() {
    let fx = Fixture::new();
    let registry = fx.registry();
    assert!(registry.is_empty());
    assert!(!fx.store().path().exists());
}

#[test]
fn test_add_persists_across_reopen() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    let b = fx.doc("b.iatf", SAMPLE);

    let mut registry = fx.registry();
    registry.add(&a).unwrap();
    registry.add(&b).unwrap();

    let reopened = fx.registry();
    let paths: Vec<_> = reopened.list().map(|e| e.path.clone()).collect();
    assert_eq!(paths, vec![a.clone(), b]);
    let entry = reopened.get(&a).unwrap();
    assert_eq!(entry.status, WatchStatus::Idle);
    assert_eq!(entry.last_digest, None);
    assert!(fx.dir.path().join("state").join(STATE_FILE).exists());
}

#[test]
fn test_add_is_idempotent() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    let mut registry = fx.registry();
    let first = registry.add(&a).unwrap();
    let second = registry.add(&a).unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(first.added_at, second.added_at);
}

#[test]
fn test_add_missing_file() {
    let fx = Fixture::new();
    let mut registry = fx.registry();
    let err = registry.add(&fx.dir.path().join("nope.iatf")).unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
    assert!(registry.is_empty());
}

#[test]
fn test_add_records_stored_digest() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    let report = RebuildEngine::new().rebuild(&a).unwrap();

    let mut registry = fx.registry();
    let entry = registry.add(&a).unwrap();
    assert_eq!(entry.last_digest, Some(report.digest.to_string()));
}

#[test]
fn test_remove() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    let mut registry = fx.registry();
    registry.add(&a).unwrap();

    let unwatched = registry.remove(&a).unwrap();
    assert!(!unwatched.directory);
    assert_eq!(unwatched.documents, vec![a.clone()]);
    assert!(registry.remove(&a).unwrap().is_empty());
    assert!(fx.registry().is_empty());
}

#[test]
fn test_remove_deleted_file() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    let mut registry = fx.registry();
    registry.add(&a).unwrap();
    fs::remove_file(&a).unwrap();
    assert_eq!(registry.remove(&a).unwrap().documents, vec![a]);
}

#[test]
fn test_poll_rebuilds_stale_then_skips() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    let mut registry = fx.registry();
    registry.add(&a).unwrap();
    let engine = fx.engine();

    let summary = registry.poll(&engine).unwrap();
    assert_eq!((summary.checked, summary.rebuilt), (1, 1));
    assert!(fs::read_to_string(&a).unwrap().contains("===INDEX==="));
    let entry = registry.get(&a).unwrap();
    assert_eq!(entry.status, WatchStatus::Idle);
    assert!(entry.last_digest.is_some());
    assert!(entry.last_rebuild_at.is_some());

    let bytes = fs::read(&a).unwrap();
    let summary = registry.poll(&engine).unwrap();
    assert_eq!((summary.unchanged, summary.rebuilt), (1, 0));
    assert_eq!(fs::read(&a).unwrap(), bytes);
}

#[test]
fn test_poll_picks_up_content_edits() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    let mut registry = fx.registry();
    registry.add(&a).unwrap();
    let engine = fx.engine();
    registry.poll(&engine).unwrap();
    let before = registry.get(&a).unwrap().last_digest.clone();

    let edited = fs::read_to_string(&a)
        .unwrap()
        .replace("Some words.", "Some more words.");
    fs::write(&a, edited).unwrap();

    assert_eq!(registry.poll(&engine).unwrap().rebuilt, 1);
    assert_ne!(registry.get(&a).unwrap().last_digest, before);
    assert!(fs::read_to_string(&a)
        .unwrap()
        .contains("| words:5}"));
}

#[test]
fn test_poll_error_is_recorded_and_retried() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", &SAMPLE.replace("{/only}", ""));
    let b = fx.doc("b.iatf", SAMPLE);
    let mut registry = fx.registry();
    registry.add(&a).unwrap();
    registry.add(&b).unwrap();
    let engine = fx.engine();

    let summary = registry.poll(&engine).unwrap();
    assert_eq!((summary.failed, summary.rebuilt), (1, 1));
    let entry = registry.get(&a).unwrap();
    assert_eq!(entry.status, WatchStatus::Error);
    assert!(entry.last_error.as_deref().unwrap().contains("unclosed section"));

    fs::write(&a, SAMPLE).unwrap();
    let summary = registry.poll(&engine).unwrap();
    assert_eq!(summary.rebuilt, 1);
    let entry = registry.get(&a).unwrap();
    assert_eq!(entry.status, WatchStatus::Idle);
    assert_eq!(entry.last_error, None);
}

#[test]
fn test_failed_entry_is_retried_even_if_unchanged() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", &SAMPLE.replace("{/only}", ""));
    let mut registry = fx.registry();
    registry.add(&a).unwrap();
    let engine = fx.engine();

    assert_eq!(registry.poll(&engine).unwrap().failed, 1);
    assert_eq!(registry.poll(&engine).unwrap().failed, 1);
}

#[test]
fn test_deleted_file_is_marked_error_and_kept() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    let mut registry = fx.registry();
    registry.add(&a).unwrap();
    fs::remove_file(&a).unwrap();

    let summary = registry.poll(&fx.engine()).unwrap();
    assert_eq!(summary.failed, 1);
    let entry = registry.get(&a).unwrap();
    assert_eq!(entry.status, WatchStatus::Error);
    assert_eq!(entry.last_error.as_deref(), Some("file not found"));
    assert_eq!(fx.registry().len(), 1);
}

#[test]
fn test_locked_document_is_left_for_next_cycle() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    let mut registry = fx.registry();
    registry.add(&a).unwrap();

    let locks = LockDir::new(fx.dir.path().join("state").join("locks"));
    let engine = RebuildEngine::with_locks(locks.clone());
    let held = locks.acquire(&a).unwrap();
    let summary = registry.poll(&engine).unwrap();
    assert_eq!(summary.busy, 1);
    assert_eq!(registry.get(&a).unwrap().status, WatchStatus::Modified);
    assert_eq!(fs::read_to_string(&a).unwrap(), SAMPLE);

    drop(held);
    assert_eq!(registry.poll(&engine).unwrap().rebuilt, 1);
}

#[test]
fn test_concurrent_handles_do_not_lose_entries() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    let b = fx.doc("b.iatf", SAMPLE);

    let mut first = fx.registry();
    let mut second = fx.registry();
    first.add(&a).unwrap();
    second.add(&b).unwrap();

    assert_eq!(fx.registry().len(), 2);
    first.reload().unwrap();
    assert_eq!(first.len(), 2);
}

#[test]
fn test_poll_sees_external_unwatch() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    let mut watcher = fx.registry();
    watcher.add(&a).unwrap();

    fx.registry().remove(&a).unwrap();
    let summary = watcher.poll(&fx.engine()).unwrap();
    assert_eq!(summary.checked, 0);
    assert!(watcher.is_empty());
}

#[test]
fn test_run_returns_when_registry_is_empty() {
    let fx = Fixture::new();
    let mut registry = fx.registry();
    registry.run(&fx.engine(), std::time::Duration::from_millis(1));
    assert!(registry.is_empty());
}

#[test]
fn test_corrupt_state_is_reported() {
    let fx = Fixture::new();
    let store = fx.store();
    fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    fs::write(store.path(), "{not json").unwrap();
    assert!(matches!(
        WatchRegistry::open(store),
        Err(RegistryError::Corrupt { .. })
    ));
}

#[test]
fn test_state_file_format() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    fx.registry().add(&a).unwrap();

    let raw = fs::read_to_string(fx.store().path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["version"], 1);
    let entry = &json["entries"][a.to_str().unwrap()];
    assert_eq!(entry["status"], "idle");
    assert!(entry["added_at"].is_string());
}

fn exts() -> Vec<String> {
    vec!["iatf".to_string()]
}

#[test]
fn test_add_dir_registers_documents() {
    let fx = Fixture::new();
    let docs = fx.docs_dir();
    fx.doc("docs/a.iatf", SAMPLE);
    fx.doc("docs/b.iatf", SAMPLE);
    fx.doc("docs/notes.md", "ignored");

    let mut registry = fx.registry();
    let entries = registry.add_dir(&docs, &exts()).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.dir.as_deref() == Some(docs.as_path())));

    let reopened = fx.registry();
    assert_eq!(reopened.len(), 2);
    let dirs: Vec<_> = reopened.list_dirs().map(|d| d.path.clone()).collect();
    assert_eq!(dirs, vec![docs]);
}

#[test]
fn test_add_dir_rejects_missing_and_file_paths() {
    let fx = Fixture::new();
    let a = fx.doc("a.iatf", SAMPLE);
    let mut registry = fx.registry();
    assert!(matches!(
        registry.add_dir(&fx.dir.path().join("nope"), &exts()),
        Err(RegistryError::NotFound(_))
    ));
    assert!(matches!(
        registry.add_dir(&a, &exts()),
        Err(RegistryError::NotADirectory(_))
    ));
    assert!(registry.is_empty());
}

#[test]
fn test_add_dir_keeps_existing_entry() {
    let fx = Fixture::new();
    let docs = fx.docs_dir();
    let a = fx.doc("docs/a.iatf", SAMPLE);
    let mut registry = fx.registry();
    registry.add(&a).unwrap();

    registry.add_dir(&docs, &exts()).unwrap();
    assert_eq!(registry.get(&a).unwrap().dir, None);
}

#[test]
fn test_poll_picks_up_new_file_in_watched_dir() {
    let fx = Fixture::new();
    let docs = fx.docs_dir();
    let mut registry = fx.registry();
    assert!(registry.add_dir(&docs, &exts()).unwrap().is_empty());
    assert!(!registry.is_empty());
    let engine = fx.engine();
    assert_eq!(registry.poll(&engine).unwrap().checked, 0);

    let a = fx.doc("docs/a.iatf", SAMPLE);
    let summary = registry.poll(&engine).unwrap();
    assert_eq!((summary.checked, summary.rebuilt), (1, 1));
    assert_eq!(registry.get(&a).unwrap().dir.as_deref(), Some(docs.as_path()));
    assert!(fs::read_to_string(&a).unwrap().contains("===INDEX==="));
}

#[test]
fn test_deleted_file_from_watched_dir_is_dropped() {
    let fx = Fixture::new();
    let docs = fx.docs_dir();
    let a = fx.doc("docs/a.iatf", SAMPLE);
    let b = fx.doc("docs/b.iatf", SAMPLE);
    let mut registry = fx.registry();
    registry.add_dir(&docs, &exts()).unwrap();
    fs::remove_file(&a).unwrap();

    let summary = registry.poll(&fx.engine()).unwrap();
    assert_eq!((summary.checked, summary.failed), (1, 0));
    assert!(registry.get(&a).is_none());
    assert!(registry.get(&b).is_some());
    assert_eq!(fx.registry().len(), 1);
}

#[test]
fn test_unwatch_dir_removes_its_entries() {
    let fx = Fixture::new();
    let docs = fx.docs_dir();
    let a = fx.doc("docs/a.iatf", SAMPLE);
    let b = fx.doc("docs/b.iatf", SAMPLE);
    let other = fx.doc("other.iatf", SAMPLE);
    let mut registry = fx.registry();
    registry.add_dir(&docs, &exts()).unwrap();
    registry.add(&other).unwrap();

    let unwatched = registry.remove(&docs).unwrap();
    assert!(unwatched.directory);
    assert_eq!(unwatched.documents, vec![a, b]);
    assert_eq!(registry.list_dirs().count(), 0);
    let left: Vec<_> = fx.registry().list().map(|e| e.path.clone()).collect();
    assert_eq!(left, vec![other]);
}

#[test]
fn test_run_keeps_going_while_a_dir_is_watched() {
    let fx = Fixture::new();
    let docs = fx.docs_dir();
    let mut registry = fx.registry();
    registry.add_dir(&docs, &exts()).unwrap();

    let mut unwatcher = fx.registry();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(50));
        unwatcher.remove(&docs).unwrap();
    });
    registry.run(&fx.engine(), std::time::Duration::from_millis(5));
    handle.join().unwrap();
    assert!(registry.is_empty());
}
