//! Scoped watch subscriptions.
//!
//! A [`WatchGuard`] holds one reference on the backend watch of a local
//! directory, or announces a remote directory on the bus. Dropping the guard
//! releases it, so removing a record from the cache can never leak a watch.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};
use url::Url;
use vfs_directory_watcher::WatchBackend;
use vfs_item::UrlExt;

use crate::dirnotify::{DirNotification, DirNotifier};

type SharedBackend = Arc<Mutex<Box<dyn WatchBackend>>>;

/// Hands out watch guards. Cheap to clone.
#[derive(Clone, Default)]
pub struct WatchHub {
    backend: Option<SharedBackend>,
    notifier: Option<DirNotifier>,
}

impl fmt::Debug for WatchHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHub")
            .field("backend", &self.backend.is_some())
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

impl WatchHub {
    pub fn new(backend: Box<dyn WatchBackend>) -> Self {
        Self {
            backend: Some(Arc::new(Mutex::new(backend))),
            notifier: None,
        }
    }

    /// A hub that never watches anything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Announce watches on remote directories on `notifier`.
    pub fn with_notifier(mut self, notifier: DirNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Start watching the directory `url`, whose local path (if any) is
    /// `path`.
    pub fn acquire(&self, url: &Url, path: Option<&Path>) -> WatchGuard {
        let mut guard = WatchGuard {
            hub: self.clone(),
            url: url.clone(),
            path: None,
        };

        match (path, &self.backend) {
            (Some(path), Some(backend)) => {
                let mut backend = backend.lock().unwrap_or_else(PoisonError::into_inner);
                match backend.add_dir(path) {
                    Ok(()) => guard.path = Some(path.to_path_buf()),
                    Err(e) => warn!("Cannot watch {}: {e}", path.display()),
                }
            }
            (Some(_), None) => {}
            (None, _) => {
                if let Some(notifier) = &self.notifier {
                    notifier.emit(DirNotification::EnteredDirectory { url: url.clone() });
                }
            }
        }
        guard
    }
}

/// One live watch subscription.
pub struct WatchGuard {
    hub: WatchHub,
    url: Url,
    /// Set when the backend accepted the watch.
    path: Option<PathBuf>,
}

impl WatchGuard {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether the backend holds a watch for this guard.
    pub fn is_active(&self) -> bool {
        self.path.is_some()
    }
}

impl fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchGuard")
            .field("url", &self.url.as_str())
            .field("path", &self.path)
            .finish()
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Some(backend) = &self.hub.backend {
                let mut backend = backend.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = backend.remove_dir(&path) {
                    warn!("Failed to release watch on {}: {e}", path.display());
                }
            }
            debug!("Released watch on {}", path.display());
        } else if !self.url.is_local_file() {
            if let Some(notifier) = &self.hub.notifier {
                notifier.emit(DirNotification::LeftDirectory {
                    url: self.url.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use vfs_directory_watcher::Result as WatchResult;

    #[derive(Default)]
    struct Counting(Arc<Mutex<HashMap<PathBuf, i32>>>);

    impl WatchBackend for Counting {
        fn add_dir(&mut self, path: &Path) -> WatchResult<()> {
            *self.0.lock().unwrap().entry(path.to_path_buf()).or_default() += 1;
            Ok(())
        }

        fn remove_dir(&mut self, path: &Path) -> WatchResult<()> {
            *self.0.lock().unwrap().entry(path.to_path_buf()).or_default() -= 1;
            Ok(())
        }
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let counts = Arc::new(Mutex::new(HashMap::new()));
        let hub = WatchHub::new(Box::new(Counting(counts.clone())));
        let url = Url::parse("file:///tmp/a").unwrap();
        let path = Path::new("/tmp/a");

        let first = hub.acquire(&url, Some(path));
        let second = hub.acquire(&url, Some(path));
        assert!(first.is_active());
        assert_eq!(counts.lock().unwrap()[path], 2);

        drop(first);
        assert_eq!(counts.lock().unwrap()[path], 1);
        drop(second);
        assert_eq!(counts.lock().unwrap()[path], 0);
    }

    #[test]
    fn test_remote_directories_are_announced() {
        let bus = DirNotifier::new();
        let mut rx = bus.subscribe();
        let hub = WatchHub::disabled().with_notifier(bus);
        let url = Url::parse("sftp://host/dir").unwrap();

        let guard = hub.acquire(&url, None);
        assert!(!guard.is_active());
        drop(guard);

        assert_eq!(
            rx.try_recv().unwrap(),
            DirNotification::EnteredDirectory { url: url.clone() }
        );
        assert_eq!(rx.try_recv().unwrap(), DirNotification::LeftDirectory { url });
    }
}
