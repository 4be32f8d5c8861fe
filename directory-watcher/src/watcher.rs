//! Directory watcher implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use notify::{PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{WatchMode, WatcherConfig};
use crate::error::{Result, WatcherError};
use crate::event::WatchEvent;

/// Something that can start and stop watching directories.
///
/// Calls are ref-counted: every `add_dir` must be balanced by one
/// `remove_dir`, and the underlying watch exists while the count is positive.
pub trait WatchBackend: Send {
    /// Take one reference on a watch of `path`.
    fn add_dir(&mut self, path: &Path) -> Result<()>;

    /// Drop one reference on the watch of `path`.
    fn remove_dir(&mut self, path: &Path) -> Result<()>;
}

/// Ref-counted, non-recursive directory watcher backed by `notify`.
pub struct DirectoryWatcher {
    /// Reference count per watched directory.
    counts: HashMap<PathBuf, usize>,

    /// Internal notify watcher.
    watcher: Box<dyn Watcher + Send>,
}

impl DirectoryWatcher {
    /// Create a watcher and the receiver its events arrive on.
    pub fn new(config: &WatcherConfig) -> Result<(Self, mpsc::UnboundedReceiver<WatchEvent>)> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let report_access = config.report_access;

        let handler = move |res: std::result::Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                for watch_event in WatchEvent::from_notify(event, report_access) {
                    if event_tx.send(watch_event).is_err() {
                        debug!("Watch event receiver dropped");
                        return;
                    }
                }
            }
            Err(e) => {
                error!("Watch error: {e}");
            }
        };

        let watcher: Box<dyn Watcher + Send> = match config.mode {
            WatchMode::Realtime => Box::new(RecommendedWatcher::new(
                handler,
                notify::Config::default(),
            )?),
            WatchMode::Polling => Box::new(PollWatcher::new(
                handler,
                notify::Config::default().with_poll_interval(config.poll_interval()),
            )?),
        };

        info!("Directory watcher started ({:?})", config.mode);
        Ok((
            Self {
                counts: HashMap::new(),
                watcher,
            },
            event_rx,
        ))
    }

    /// Whether `path` currently has a watch.
    pub fn is_watched(&self, path: &Path) -> bool {
        self.counts.contains_key(path)
    }

    /// Reference count on `path`, 0 when not watched.
    pub fn ref_count(&self, path: &Path) -> usize {
        self.counts.get(path).copied().unwrap_or(0)
    }

    /// Currently watched directories.
    pub fn directories(&self) -> Vec<PathBuf> {
        self.counts.keys().cloned().collect()
    }

    /// Get statistics about watched directories.
    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            watched_directories: self.counts.len(),
            total_references: self.counts.values().sum(),
        }
    }
}

impl WatchBackend for DirectoryWatcher {
    fn add_dir(&mut self, path: &Path) -> Result<()> {
        if let Some(count) = self.counts.get_mut(path) {
            *count += 1;
            return Ok(());
        }

        if !path.exists() {
            return Err(WatcherError::DirectoryNotFound(path.display().to_string()));
        }
        if !path.is_dir() {
            return Err(WatcherError::NotADirectory(path.display().to_string()));
        }

        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        debug!("Started watching: {}", path.display());
        self.counts.insert(path.to_path_buf(), 1);
        Ok(())
    }

    fn remove_dir(&mut self, path: &Path) -> Result<()> {
        let Some(count) = self.counts.get_mut(path) else {
            return Err(WatcherError::NotWatched(path.display().to_string()));
        };
        *count -= 1;
        if *count > 0 {
            return Ok(());
        }

        self.counts.remove(path);
        // The directory may already be gone, which removes the OS watch too.
        if let Err(e) = self.watcher.unwatch(path) {
            warn!("Failed to unwatch {}: {e}", path.display());
        }
        debug!("Stopped watching: {}", path.display());
        Ok(())
    }
}

/// Statistics about the directory watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherStats {
    /// Directories with an active watch.
    pub watched_directories: usize,

    /// Sum of all reference counts.
    pub total_references: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::WatchEventKind;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ref_counting() {
        let temp_dir = TempDir::new().unwrap();
        let (mut watcher, _rx) = DirectoryWatcher::new(&WatcherConfig::default()).unwrap();

        watcher.add_dir(temp_dir.path()).unwrap();
        watcher.add_dir(temp_dir.path()).unwrap();
        assert_eq!(watcher.ref_count(temp_dir.path()), 2);
        assert_eq!(
            watcher.stats(),
            WatcherStats {
                watched_directories: 1,
                total_references: 2,
            }
        );

        watcher.remove_dir(temp_dir.path()).unwrap();
        assert!(watcher.is_watched(temp_dir.path()));
        watcher.remove_dir(temp_dir.path()).unwrap();
        assert!(!watcher.is_watched(temp_dir.path()));

        assert!(matches!(
            watcher.remove_dir(temp_dir.path()),
            Err(WatcherError::NotWatched(_))
        ));
    }

    #[tokio::test]
    async fn test_add_nonexistent_directory() {
        let (mut watcher, _rx) = DirectoryWatcher::new(&WatcherConfig::default()).unwrap();
        let result = watcher.add_dir(Path::new("/nonexistent/path/12345"));
        assert!(matches!(result, Err(WatcherError::DirectoryNotFound(_))));
    }

    #[tokio::test]
    async fn test_add_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let (mut watcher, _rx) = DirectoryWatcher::new(&WatcherConfig::default()).unwrap();
        assert!(matches!(
            watcher.add_dir(&file),
            Err(WatcherError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_created_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let (mut watcher, mut rx) = DirectoryWatcher::new(&WatcherConfig::default()).unwrap();
        watcher.add_dir(temp_dir.path()).unwrap();

        let file = temp_dir.path().join("new.txt");
        std::fs::write(&file, b"x").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(e) if e.kind == WatchEventKind::Created => return Some(e),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(event.path.file_name(), file.file_name());
    }
}
