//! Configuration types for directory watching.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the watcher learns about changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Native OS notifications (inotify, FSEvents, ...).
    #[default]
    Realtime,

    /// Periodic polling, for filesystems without native notifications.
    Polling,
}

/// Configuration for a [`crate::DirectoryWatcher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// How to watch directories.
    pub mode: WatchMode,

    /// Poll interval in milliseconds, used in [`WatchMode::Polling`].
    pub poll_interval_ms: u64,

    /// Also report pure access events as dirty.
    pub report_access: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Realtime,
            poll_interval_ms: 2000,
            report_access: false,
        }
    }
}

impl WatcherConfig {
    /// Set the watch mode.
    pub fn with_mode(mut self, mode: WatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
