//! Cache of parsed `.hidden` files.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use lru::LruCache;
use tracing::debug;

const DOT_HIDDEN: &str = ".hidden";

#[derive(Debug)]
struct CachedHidden {
    mtime: SystemTime,
    names: Arc<HashSet<String>>,
}

/// Names listed in `<dir>/.hidden`, one per line, keyed by file path and
/// re-read whenever the file's modification time changes.
#[derive(Debug)]
pub struct HiddenFileCache {
    entries: LruCache<PathBuf, CachedHidden>,
}

impl HiddenFileCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Names to hide in `dir`, or `None` when it has no readable `.hidden`.
    pub fn names_for_dir(&mut self, dir: &Path) -> Option<Arc<HashSet<String>>> {
        let path = dir.join(DOT_HIDDEN);
        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;

        if let Some(cached) = self.entries.get(&path) {
            if mtime == cached.mtime {
                return Some(cached.names.clone());
            }
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                debug!("Cannot read {}: {e}", path.display());
                return None;
            }
        };
        let names: Arc<HashSet<String>> = Arc::new(
            content
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        );
        self.entries.put(
            path,
            CachedHidden {
                mtime,
                names: names.clone(),
            },
        );
        Some(names)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
