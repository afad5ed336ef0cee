use super::write_atomic;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_creates_new_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc.iatf");
    write_atomic(&path, b"hello").unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
}

#[test]
fn test_replaces_existing_file_without_leftovers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc.iatf");
    fs::write(&path, "old contents that are longer").unwrap();
    write_atomic(&path, b"new").unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "new");

    let names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names.len(), 1);
}

#[cfg(unix)]
#[test]
fn test_preserves_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc.iatf");
    fs::write(&path, "x").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();
    write_atomic(&path, b"y").unwrap();
    let mode = fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o640);
}

#[test]
fn test_missing_directory_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent").join("doc.iatf");
    assert!(write_atomic(&path, b"x").is_err());
}
