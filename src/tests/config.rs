use super::Config;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::load_from(&dir.path().join("iatf.toml"));
    assert_eq!(cfg, Config::default());
    assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
    assert_eq!(cfg.file_extensions, vec!["iatf".to_string()]);
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("iatf.toml");
    fs::write(&path, "poll_interval_ms = 250\n").unwrap();
    let cfg = Config::load_from(&path);
    assert_eq!(cfg.poll_interval_ms, 250);
    assert_eq!(cfg.file_extensions, vec!["iatf".to_string()]);
    assert!(cfg.state_dir.is_empty());
}

#[test]
fn test_invalid_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("iatf.toml");
    fs::write(&path, "poll_interval_ms = \"soon\"\n").unwrap();
    assert_eq!(Config::load_from(&path), Config::default());
}

#[test]
fn test_state_dir_override() {
    let cfg = Config {
        state_dir: "/var/lib/iatf".to_string(),
        ..Config::default()
    };
    assert_eq!(cfg.state_dir(), PathBuf::from("/var/lib/iatf"));
    assert_eq!(cfg.lock_dir(), PathBuf::from("/var/lib/iatf/locks"));
}

#[test]
fn test_default_state_dir_is_hidden_dir() {
    let cfg = Config::default();
    assert!(cfg.state_dir().ends_with(".iatf"));
}
