//! Configuration to acknowledge user preferences as well as set defaults.
//!
//! Specifically, we try to find an iatf.toml in the working directory, and if present we load
//! settings from there. This provides the watch poll interval, the file extensions `rebuild-all`
//! matches, and where watch state and locks are kept.

use facet::Facet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = "iatf.toml";
const STATE_DIR_NAME: &str = ".iatf";
const LOCK_DIR_NAME: &str = "locks";

#[derive(Facet, Clone, Debug, PartialEq, Eq)]
/// User preferences loaded from iatf.toml or falling back to defaults.
pub struct Config {
    #[facet(default = 1000)]
    /// Delay between watch poll cycles, in milliseconds.
    pub poll_interval_ms: u64,
    #[facet(default = vec!["iatf".to_string()])]
    /// File suffixes to match when scanning directories.
    pub file_extensions: Vec<String>,
    #[facet(default)]
    /// Directory for watch state and lock files; empty means `~/.iatf`.
    pub state_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            file_extensions: vec!["iatf".to_string()],
            state_dir: String::new(),
        }
    }
}

impl Config {
    #[must_use]
    /// Load configuration from iatf.toml if present.
    pub fn load() -> Self {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    #[must_use]
    /// Load configuration from `path`, using defaults if it is missing or invalid.
    pub fn load_from(path: &Path) -> Self {
        let Ok(contents) = fs::read_to_string(path) else {
            return Self::default();
        };
        match facet_toml::from_str::<Self>(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring invalid configuration");
                Self::default()
            }
        }
    }

    #[must_use]
    /// Delay between watch poll cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    /// Directory holding watch state, defaulting to `.iatf` in the home directory.
    pub fn state_dir(&self) -> PathBuf {
        if !self.state_dir.is_empty() {
            return PathBuf::from(&self.state_dir);
        }
        dirs::home_dir().map_or_else(
            || PathBuf::from(STATE_DIR_NAME),
            |home| home.join(STATE_DIR_NAME),
        )
    }

    #[must_use]
    /// Directory holding per-document lock files.
    pub fn lock_dir(&self) -> PathBuf {
        self.state_dir().join(LOCK_DIR_NAME)
    }
}

#[cfg(test)]
#[path = "tests/config.rs"]
mod tests;
