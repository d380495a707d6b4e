//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::infrastructure::cache::{DEFAULT_DISK_BUDGET, DEFAULT_MEMORY_BUDGET};

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "tecknian";
const APP_NAME: &str = "picfetch";

/// Configuration for the image loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Memory cache byte budget.
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: usize,

    /// Disk store byte budget.
    #[serde(default = "default_disk_budget")]
    pub disk_budget_bytes: u64,

    /// Disk store directory. Resolved via the platform cache directory
    /// when unset.
    #[serde(default)]
    pub disk_dir: Option<PathBuf>,

    /// Disk store schema version; bump to discard entries on upgrade.
    #[serde(default = "default_disk_version")]
    pub disk_version: u32,

    /// Network connect/read timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum concurrent network fetches.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: default_memory_budget(),
            disk_budget_bytes: default_disk_budget(),
            disk_dir: None,
            disk_version: default_disk_version(),
            timeout_secs: default_timeout_secs(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

impl LoaderConfig {
    /// The disk store directory, falling back to the platform cache dir.
    #[must_use]
    pub fn effective_disk_dir(&self) -> PathBuf {
        self.disk_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// The network timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

const fn default_memory_budget() -> usize {
    DEFAULT_MEMORY_BUDGET
}

const fn default_disk_budget() -> u64 {
    DEFAULT_DISK_BUDGET
}

const fn default_disk_version() -> u32 {
    1
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_concurrent_fetches() -> usize {
    4
}

/// Returns the default cache directory path.
fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
        || std::env::temp_dir().join(APP_NAME).join("cache").join("images"),
        |dirs| dirs.cache_dir().join("images"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.disk_budget_bytes, 100 * 1024 * 1024);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_concurrent_fetches, 4);
        assert_eq!(config.disk_version, 1);
        assert!(config.disk_dir.is_none());
    }

    #[test]
    fn test_effective_disk_dir_prefers_explicit() {
        let config = LoaderConfig {
            disk_dir: Some(PathBuf::from("/tmp/picfetch-test")),
            ..LoaderConfig::default()
        };
        assert_eq!(config.effective_disk_dir(), PathBuf::from("/tmp/picfetch-test"));

        let fallback = LoaderConfig::default().effective_disk_dir();
        assert!(fallback.components().count() > 1);
    }
}
