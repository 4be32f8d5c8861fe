//! Per-directory state: the sorted item list and its watch.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::debug;
use url::Url;
use vfs_item::{Item, UrlExt};

use crate::lister::ListerId;
use crate::watch::{WatchGuard, WatchHub};

/// Who wants a directory watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WatchOwner {
    /// A lister with auto-update enabled for the directory.
    Lister(ListerId),

    /// The cache, keeping a complete unreferenced directory fresh.
    Cache,
}

/// Everything known about one listed directory.
///
/// Items are kept sorted by URL without duplicates. The directory is watched
/// exactly while at least one [`WatchOwner`] is registered.
#[derive(Debug)]
pub struct DirRecord {
    url: Url,
    canonical_path: Option<PathBuf>,
    root_item: Option<Item>,
    items: Vec<Item>,
    complete: bool,
    watchers: BTreeSet<WatchOwner>,
    watch: Option<WatchGuard>,
    hub: WatchHub,
}

impl DirRecord {
    pub fn new(url: &Url, hub: WatchHub) -> Self {
        let url = url.adjusted();
        Self {
            canonical_path: canonical_path(&url),
            url,
            root_item: None,
            items: Vec::new(),
            complete: false,
            watchers: BTreeSet::new(),
            watch: None,
            hub,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Local path with symlinks resolved; where the watch is placed.
    pub fn canonical_path(&self) -> Option<&Path> {
        self.canonical_path.as_deref()
    }

    /// URL form of [`DirRecord::canonical_path`] when it differs from the
    /// record's own URL.
    pub fn canonical_url(&self) -> Option<Url> {
        let path = self.canonical_path.as_deref()?;
        let resolved = vfs_item::url_from_path(path)?;
        (resolved != self.url).then_some(resolved)
    }

    pub fn root_item(&self) -> Option<&Item> {
        self.root_item.as_ref()
    }

    pub fn set_root_item(&mut self, item: Option<Item>) {
        self.root_item = item;
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn set_complete(&mut self, complete: bool) {
        self.complete = complete;
    }

    pub fn watchers(&self) -> &BTreeSet<WatchOwner> {
        &self.watchers
    }

    pub fn has_watcher(&self, owner: WatchOwner) -> bool {
        self.watchers.contains(&owner)
    }

    /// Whether a watch subscription is live.
    pub fn is_watched(&self) -> bool {
        self.watch.is_some()
    }

    /// Register `owner`. Returns false if it was already registered.
    pub fn add_watcher(&mut self, owner: WatchOwner) -> bool {
        let added = self.watchers.insert(owner);
        self.sync_watch();
        added
    }

    /// Unregister `owner`. Returns false if it was not registered.
    pub fn remove_watcher(&mut self, owner: WatchOwner) -> bool {
        let removed = self.watchers.remove(&owner);
        self.sync_watch();
        removed
    }

    fn sync_watch(&mut self) {
        match (self.watchers.is_empty(), self.watch.is_some()) {
            (false, false) => {
                debug!("Watching {}", self.url);
                self.watch = Some(self.hub.acquire(&self.url, self.canonical_path.as_deref()));
            }
            (true, true) => {
                debug!("No longer watching {}", self.url);
                self.watch = None;
            }
            _ => {}
        }
    }

    /// Position of `url` in the item list.
    fn position(&self, url: &Url) -> Result<usize, usize> {
        self.items.binary_search_by(|item| item.url().cmp(url))
    }

    pub fn find(&self, url: &Url) -> Option<&Item> {
        self.position(url).ok().map(|i| &self.items[i])
    }

    /// Insert at the sorted position, replacing an item with the same URL.
    pub fn insert(&mut self, item: Item) {
        match self.position(item.url()) {
            Ok(i) => self.items[i] = item,
            Err(i) => self.items.insert(i, item),
        }
    }

    /// Merge already sorted items. Same-URL items replace existing ones.
    pub fn insert_sorted_items(&mut self, items: Vec<Item>) {
        if items.is_empty() {
            return;
        }
        if self.items.is_empty() {
            self.items = items;
            self.items.dedup_by(|later, earlier| later.url() == earlier.url());
            return;
        }

        let old = std::mem::take(&mut self.items);
        let mut merged = Vec::with_capacity(old.len() + items.len());
        let mut old = old.into_iter().peekable();
        let mut new = items.into_iter().peekable();
        loop {
            let take_new = match (old.peek(), new.peek()) {
                (Some(o), Some(n)) => match n.url().cmp(o.url()) {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Equal => {
                        old.next();
                        true
                    }
                    std::cmp::Ordering::Greater => false,
                },
                (None, Some(_)) => true,
                (Some(_), None) => false,
                (None, None) => break,
            };
            let next = if take_new { new.next() } else { old.next() };
            if let Some(item) = next {
                if merged.last().is_some_and(|last: &Item| last.url() == item.url()) {
                    merged.pop();
                }
                merged.push(item);
            }
        }
        self.items = merged;
    }

    pub fn remove(&mut self, url: &Url) -> Option<Item> {
        self.position(url).ok().map(|i| self.items.remove(i))
    }

    /// Replace the item stored under `old_url` with `item`, moving it to its
    /// new sorted position. Returns false when `old_url` was not found.
    pub fn reinsert(&mut self, item: Item, old_url: &Url) -> bool {
        if self.remove(old_url).is_none() {
            return false;
        }
        self.insert(item);
        true
    }

    /// Drop all items, returning them.
    pub fn take_items(&mut self) -> Vec<Item> {
        std::mem::take(&mut self.items)
    }

    /// Move the record to `new_url`. Child URLs and the root item are
    /// re-based and an active watch moves to the new location. Returns the
    /// `(old, new)` pair of every child whose URL changed.
    pub fn redirect(&mut self, new_url: &Url) -> Vec<(Item, Item)> {
        let old_url = std::mem::replace(&mut self.url, new_url.adjusted());
        self.canonical_path = canonical_path(&self.url);

        if let Some(root) = &mut self.root_item {
            root.set_url(&self.url);
        }
        let mut changed = Vec::new();
        for item in &mut self.items {
            if let Some(rebased) = item.url().rebase(&old_url, &self.url) {
                let old = item.clone();
                item.set_url(&rebased);
                changed.push((old, item.clone()));
            }
        }
        // A shared prefix was replaced, so the order holds; sort anyway for
        // URLs whose encoding changed.
        self.items.sort();

        if self.watch.is_some() {
            // Release first: the old path may be gone already.
            self.watch = None;
            self.sync_watch();
        }
        changed
    }
}

fn canonical_path(url: &Url) -> Option<PathBuf> {
    let path = url.local_path()?;
    Some(dunce::canonicalize(&path).unwrap_or(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use vfs_directory_watcher::{Result as WatchResult, WatchBackend};
    use vfs_item::{Entry, EntryField};

    type Log = Arc<Mutex<HashMap<PathBuf, i32>>>;

    struct Counting(Log);

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

    fn dir_url() -> Url {
        Url::parse("file:///tmp/a").unwrap()
    }

    fn item(name: &str) -> Item {
        Item::from_entry(Entry::new().with_string(EntryField::Name, name), &dir_url())
    }

    fn names(record: &DirRecord) -> Vec<&str> {
        record.items().iter().map(Item::name).collect()
    }

    #[test]
    fn test_items_stay_sorted_and_unique() {
        let mut record = DirRecord::new(&dir_url(), WatchHub::disabled());
        record.insert(item("c"));
        record.insert(item("a"));
        record.insert_sorted_items(vec![item("a"), item("b"), item("d")]);
        record.insert(item("b"));

        assert_eq!(names(&record), vec!["a", "b", "c", "d"]);
        assert!(record.find(&dir_url().join_name("c")).is_some());

        record.remove(&dir_url().join_name("c"));
        assert_eq!(names(&record), vec!["a", "b", "d"]);
        assert!(record.find(&dir_url().join_name("c")).is_none());
    }

    #[test]
    fn test_reinsert_moves_item() {
        let mut record = DirRecord::new(&dir_url(), WatchHub::disabled());
        record.insert_sorted_items(vec![item("a"), item("m")]);

        let mut renamed = item("m");
        renamed.set_url(&dir_url().join_name("0"));
        assert!(record.reinsert(renamed, &dir_url().join_name("m")));
        assert_eq!(names(&record), vec!["0", "a"]);

        assert!(!record.reinsert(item("zz"), &dir_url().join_name("nope")));
    }

    #[test]
    fn test_watch_follows_watchers_exactly() {
        let log: Log = Arc::default();
        let hub = WatchHub::new(Box::new(Counting(log.clone())));
        let tmp = TempDir::new().unwrap();
        let url = vfs_item::url_from_path(tmp.path()).unwrap();
        let mut record = DirRecord::new(&url, hub);
        let path = record.canonical_path().unwrap().to_path_buf();

        assert!(record.add_watcher(WatchOwner::Lister(ListerId(1))));
        assert!(!record.add_watcher(WatchOwner::Lister(ListerId(1))));
        assert!(record.add_watcher(WatchOwner::Cache));
        assert_eq!(log.lock().unwrap()[&path], 1);

        assert!(record.remove_watcher(WatchOwner::Lister(ListerId(1))));
        assert!(!record.remove_watcher(WatchOwner::Lister(ListerId(1))));
        assert!(record.is_watched());
        record.remove_watcher(WatchOwner::Cache);
        assert!(!record.is_watched());
        assert_eq!(log.lock().unwrap()[&path], 0);

        record.add_watcher(WatchOwner::Cache);
        drop(record);
        assert_eq!(log.lock().unwrap()[&path], 0);
    }

    #[test]
    fn test_redirect_rebases_children() {
        let mut record = DirRecord::new(&dir_url(), WatchHub::disabled());
        record.insert_sorted_items(vec![item("x"), item("y")]);
        record.set_root_item(Some(item(".")));

        let new_url = Url::parse("file:///tmp/b").unwrap();
        let changed = record.redirect(&new_url);
        assert_eq!(changed.len(), 2);
        assert_eq!(changed[0].0.url().as_str(), "file:///tmp/a/x");

        assert_eq!(record.url(), &new_url);
        assert_eq!(record.root_item().unwrap().url(), &new_url);
        let urls: Vec<&str> = record.items().iter().map(|i| i.url().as_str()).collect();
        assert_eq!(urls, vec!["file:///tmp/b/x", "file:///tmp/b/y"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_canonical_url_through_symlink() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let record = DirRecord::new(&vfs_item::url_from_path(&link).unwrap(), WatchHub::disabled());
        let expected = vfs_item::url_from_path(&dunce::canonicalize(&real).unwrap()).unwrap();
        assert_eq!(record.canonical_url(), Some(expected));
    }
}
