use super::LockDir;
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_second_try_acquire_is_refused() {
    let dir = TempDir::new().unwrap();
    let locks = LockDir::new(dir.path().join("locks"));
    let doc = Path::new("/tmp/some/doc.iatf");

    let held = locks.acquire(doc).unwrap();
    assert!(locks.try_acquire(doc).unwrap().is_none());
    drop(held);
    assert!(locks.try_acquire(doc).unwrap().is_some());
}

#[test]
fn test_distinct_documents_do_not_contend() {
    let dir = TempDir::new().unwrap();
    let locks = LockDir::new(dir.path());
    let _a = locks.acquire(Path::new("/a.iatf")).unwrap();
    assert!(locks.try_acquire(Path::new("/b.iatf")).unwrap().is_some());
}

#[test]
fn test_lock_dir_is_created() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("nested").join("locks");
    let locks = LockDir::new(&root);
    let _guard = locks.acquire(Path::new("/doc.iatf")).unwrap();
    assert!(root.is_dir());
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 1);
}

#[test]
fn test_release_removes_free_lock_file() {
    let dir = TempDir::new().unwrap();
    let locks = LockDir::new(dir.path());
    let doc = Path::new("/released.iatf");

    drop(locks.acquire(doc).unwrap());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    assert!(locks.release(doc).unwrap());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(!locks.release(doc).unwrap());

    let _again = locks.acquire(doc).unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_release_keeps_held_lock() {
    let dir = TempDir::new().unwrap();
    let locks = LockDir::new(dir.path());
    let doc = Path::new("/busy.iatf");

    let held = locks.acquire(doc).unwrap();
    assert!(!locks.release(doc).unwrap());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    assert!(locks.try_acquire(doc).unwrap().is_none());
    drop(held);
}

#[cfg(unix)]
#[test]
fn test_stale_handle_is_not_treated_as_lock() {
    let dir = TempDir::new().unwrap();
    let locks = LockDir::new(dir.path());
    let doc = Path::new("/replaced.iatf");

    let stale = locks.acquire(doc).unwrap();
    let lock_file = std::fs::read_dir(dir.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    std::fs::remove_file(&lock_file).unwrap();

    let fresh = locks.try_acquire(doc).unwrap();
    assert!(fresh.is_some());
    drop(stale);
}
