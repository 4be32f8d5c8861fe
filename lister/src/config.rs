//! Configuration for the directory lister.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vfs_directory_watcher::WatcherConfig;

use crate::error::{ListerError, Result};

/// Configuration for the listing cache and its service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListerConfig {
    /// Directories kept after their last lister let go.
    pub cache_capacity: usize,

    /// Parsed `.hidden` files kept around.
    pub hidden_cache_capacity: usize,

    /// Window used to coalesce watch events, in milliseconds.
    pub debounce_ms: u64,

    /// Entries per batch emitted by the local list job.
    pub list_batch_size: usize,

    /// Keep watching complete directories while they sit in the cache.
    /// When false they are stored dirty and re-listed on the next visit.
    pub keep_watch_while_cached: bool,

    /// Honour `.hidden` files in local directories.
    pub read_dot_hidden: bool,

    /// Directory watcher settings.
    pub watcher: WatcherConfig,
}

impl Default for ListerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 10,
            hidden_cache_capacity: 10,
            debounce_ms: 500,
            list_batch_size: 200,
            keep_watch_while_cached: true,
            read_dot_hidden: true,
            watcher: WatcherConfig::default(),
        }
    }
}

impl ListerConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ListerError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Set the cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the local job batch size.
    pub fn with_list_batch_size(mut self, size: usize) -> Self {
        self.list_batch_size = size.max(1);
        self
    }

    /// Choose whether cached directories keep their watch.
    pub fn with_keep_watch_while_cached(mut self, keep: bool) -> Self {
        self.keep_watch_while_cached = keep;
        self
    }

    /// Set the directory watcher settings.
    pub fn with_watcher(mut self, watcher: WatcherConfig) -> Self {
        self.watcher = watcher;
        self
    }

    /// The debounce window.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vfs_directory_watcher::WatchMode;

    #[test]
    fn test_defaults() {
        let config = ListerConfig::default();
        assert_eq!(config.cache_capacity, 10);
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert!(config.keep_watch_while_cached);
    }

    #[test]
    fn test_partial_toml() {
        let config = ListerConfig::from_toml_str(
            r#"
            cache_capacity = 3
            debounce_ms = 50

            [watcher]
            mode = "polling"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_capacity, 3);
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.list_batch_size, 200);
        assert_eq!(config.watcher.mode, WatchMode::Polling);
    }

    #[test]
    fn test_bad_toml() {
        let err = ListerConfig::from_toml_str("cache_capacity = \"many\"").unwrap_err();
        assert!(matches!(err, ListerError::Config(_)));
    }
}
