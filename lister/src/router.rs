//! Routing change notifications to records and listers.
//!
//! Watch events arrive keyed by local path, bus messages keyed by URL. Both
//! end up as item refreshes, removals, renames, or directory re-listings.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, warn};
use url::Url;
use vfs_directory_watcher::{WatchEvent, WatchEventKind};
use vfs_item::{EntryField, Item, UrlExt, url_from_path};

use crate::coordinator::DirListerCache;
use crate::dirnotify::DirNotification;
use crate::lister::{ListerEvent, ListerId};

impl DirListerCache {
    /// Feed one event from the directory watcher.
    pub fn handle_watch_event(&mut self, event: WatchEvent) {
        match event.kind {
            WatchEventKind::Dirty => self.slot_file_dirty(&event.path),
            WatchEventKind::Created => self.slot_file_created(&event.path),
            WatchEventKind::Deleted => self.slot_file_deleted(&event.path),
        }
    }

    /// Feed one message from the change bus.
    pub fn handle_notification(&mut self, notification: DirNotification) {
        match notification {
            DirNotification::FileRenamed { src, dst, dst_path } => {
                self.slot_file_renamed(&src, &dst, dst_path.as_deref());
            }
            DirNotification::FilesAdded { dir } => self.items_added_in_directory(&dir.adjusted()),
            DirNotification::FilesChanged { urls } => self.slot_files_changed(&urls),
            DirNotification::FilesRemoved { urls } => self.slot_files_removed(&urls),
            DirNotification::EnteredDirectory { url } => debug!("Peer entered {url}"),
            DirNotification::LeftDirectory { url } => debug!("Peer left {url}"),
        }
    }

    /// Queue a local file for re-stat and (re)arm the debounce deadline.
    pub(crate) fn insert_pending_update(&mut self, path: PathBuf) {
        if self.pending_updates.insert(path) {
            self.arm_pending_deadline();
        }
    }

    fn arm_pending_deadline(&mut self) {
        self.pending_deadline = Some(Instant::now() + self.config.debounce());
    }

    fn slot_file_dirty(&mut self, path: &Path) {
        let Some(url) = url_from_path(path) else {
            return;
        };
        let is_dir = match self.find_by_url(None, &url) {
            Some(item) => item.is_dir(),
            None => match std::fs::metadata(path) {
                Ok(meta) => meta.is_dir(),
                Err(e) => {
                    debug!("Dirty {} cannot be stat'ed: {e}", path.display());
                    return;
                }
            },
        };

        if is_dir {
            for dir in self.directories_for_canonical_path(&url) {
                self.handle_file_dirty(&dir);
                self.handle_dir_dirty(&dir);
            }
        } else {
            let name = url.file_name();
            for dir in self.directories_for_canonical_path(&url.parent_dir()) {
                self.handle_file_dirty(&dir.join_name(&name));
            }
        }
    }

    fn handle_dir_dirty(&mut self, url: &Url) {
        let Some(dir) = url.local_path() else {
            return;
        };
        // A re-listing covers the children already.
        self.pending_updates
            .retain(|file| file.parent() != Some(dir.as_path()));
        if self.check_update(url) && self.pending_dir_updates.insert(dir) {
            self.arm_pending_deadline();
        }
    }

    fn handle_file_dirty(&mut self, url: &Url) {
        let dir = url.parent_dir();
        if self.find_by_url(None, url).is_none() {
            self.handle_dir_dirty(&dir);
        } else if self.check_update(&dir) {
            if let Some(path) = url.local_path() {
                self.insert_pending_update(path);
            }
        }
    }

    fn slot_file_created(&mut self, path: &Path) {
        if let Some(url) = url_from_path(path) {
            self.items_added_in_directory(&url.parent_dir());
        }
    }

    fn slot_file_deleted(&mut self, path: &Path) {
        let Some(url) = url_from_path(path) else {
            return;
        };
        self.slot_files_removed(std::slice::from_ref(&url));
    }

    fn items_added_in_directory(&mut self, dir: &Url) {
        for url in self.directories_for_canonical_path(dir) {
            self.update_directory(&url);
        }
    }

    fn slot_files_changed(&mut self, urls: &[Url]) {
        let mut dirs = Vec::new();
        for url in urls {
            let url = url.adjusted();
            let Some(item) = self.find_by_url(None, &url) else {
                debug!("Changed item {url} is unknown");
                continue;
            };
            if url.is_local_file() {
                if let Some(path) = url.local_path() {
                    self.pending_updates.insert(path);
                }
            } else {
                // The worker may report a different MIME type even when the
                // entry looks the same.
                self.pending_remote_updates.insert(item.url().clone());
                let dir = url.parent_dir();
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        for dir in dirs {
            self.update_directory(&dir);
        }
        self.process_pending_updates();
    }

    fn slot_files_removed(&mut self, urls: &[Url]) {
        let mut removed: IndexMap<Url, Vec<Item>> = IndexMap::new();
        let mut deleted_dirs: Vec<Url> = Vec::new();

        for url in urls {
            let url = url.adjusted();
            // The removed path may itself be the target of a symlinked view.
            for dir in self.directories_for_canonical_path(&url) {
                if let Some(record) = self.store.record(&dir) {
                    if let Some(root) = record.root_item() {
                        removed.entry(dir.clone()).or_default().push(root.clone());
                    }
                    if !deleted_dirs.contains(&dir) {
                        deleted_dirs.push(dir);
                    }
                }
            }

            let parent = url.parent_dir();
            if parent == url {
                continue;
            }
            let name = url.file_name();
            for parent in self.directories_for_canonical_path(&parent) {
                let child = parent.join_name(&name);
                let Some(item) = self
                    .store
                    .record_mut(&parent)
                    .and_then(|record| record.remove(&child))
                else {
                    continue;
                };
                if item.is_dir() && !deleted_dirs.contains(&child) {
                    deleted_dirs.push(child);
                }
                removed.entry(parent).or_default().push(item);
            }
        }

        for (dir, items) in removed {
            for id in self.registry.holding(&dir) {
                if let Some(lister) = self.listers.get(&id) {
                    lister.emit_items_deleted(&items);
                }
            }
        }
        for url in deleted_dirs {
            self.delete_dir(&url);
        }
    }

    /// `src` was renamed to `dst`.
    fn slot_file_renamed(&mut self, src: &Url, dst: &Url, dst_path: Option<&Path>) {
        let src = src.adjusted();
        let dst = dst.adjusted();
        let Some(item) = self.find_by_url(None, &src) else {
            debug!("Renamed item {src} is unknown");
            return;
        };
        debug!("{src} renamed to {dst}");

        if self.find_by_url(None, &dst).is_some() {
            debug!("{dst} is overwritten by the rename");
            self.slot_files_removed(std::slice::from_ref(&dst));
        }

        let src_parent = src.parent_dir();
        let dst_parent = dst.parent_dir();
        let has_explicit_url = item
            .entry()
            .string_value(EntryField::Url)
            .is_some_and(|u| !u.is_empty());
        let name_only = has_explicit_url && src_parent == dst_parent;

        if !name_only && item.is_dir() {
            self.rename_dir(&src, &dst);
        }

        if !name_only && src_parent != dst_parent {
            let gone = self
                .store
                .record_mut(&src_parent)
                .and_then(|record| record.remove(&src));
            if let Some(gone) = gone {
                for id in self.registry.holding(&src_parent) {
                    if let Some(lister) = self.listers.get(&id) {
                        lister.emit_items_deleted(std::slice::from_ref(&gone));
                    }
                }
            }
            self.update_directory(&dst_parent);
            return;
        }

        let mut renamed = item.clone();
        if name_only {
            renamed.set_name(dst.file_name());
        } else {
            renamed.set_url(&dst);
        }
        if let Some(path) = dst_path {
            renamed.set_local_path(path);
        }
        renamed.refresh_mime_type();

        self.reinsert(&renamed, item.url());
        let listers = self.emit_refresh_item(&item, &renamed);
        self.flush_listers(listers);
    }

    /// Replace the item stored under `old_url` in its parent's record, and
    /// the root item of its own record.
    fn reinsert(&mut self, item: &Item, old_url: &Url) {
        let parent = old_url.parent_dir();
        if &parent != old_url {
            if let Some(record) = self.store.record_mut(&parent) {
                if !record.reinsert(item.clone(), old_url) {
                    warn!("Refresh of {old_url}, which its directory does not contain");
                }
            }
        }
        for url in [old_url, item.url()] {
            if let Some(record) = self.store.record_mut(url) {
                if record.root_item().is_some_and(|root| root.url() == url) {
                    record.set_root_item(Some(item.clone()));
                }
            }
        }
    }

    /// Queue `(old, new)` for every lister showing the item, either as a
    /// child of its directory or as the lister's root item. Returns the
    /// listers to flush.
    fn emit_refresh_item(&mut self, old: &Item, new: &Item) -> BTreeSet<ListerId> {
        let parent = old.url().parent_dir();
        let mut candidates = self.registry.all(&parent);
        if old.is_dir() {
            candidates.extend(self.registry.all(old.url()));
        }

        let mut touched = BTreeSet::new();
        for id in candidates {
            let Some(lister) = self.listers.get_mut(&id) else {
                continue;
            };
            let is_root = old.is_dir()
                && lister
                    .root_item
                    .as_ref()
                    .is_some_and(|root| root.url() == old.url());
            if is_root {
                let previous = lister.root_item.replace(new.clone());
                let previous = previous.unwrap_or_else(|| old.clone());
                lister.add_refresh_item(old.url(), &previous, new);
            } else if lister.has_replay(&parent) {
                // The replay reads the updated record.
                continue;
            } else {
                lister.add_refresh_item(&parent, old, new);
            }
            touched.insert(id);
        }
        touched
    }

    fn flush_listers(&mut self, listers: BTreeSet<ListerId>) {
        for id in listers {
            if let Some(lister) = self.listers.get_mut(&id) {
                lister.emit_items();
            }
        }
    }

    /// Move every in-use record at or below `old` to `new`.
    fn rename_dir(&mut self, old: &Url, new: &Url) {
        let mut moves = Vec::new();
        let mut touched = BTreeSet::new();
        for dir in self.store.in_use_urls() {
            let Some(new_dir) = dir.rebase(old, new) else {
                continue;
            };
            let Some(record) = self.store.in_use_record_mut(&dir) else {
                continue;
            };
            let changed = record.redirect(&new_dir);
            // Registrations are still keyed by the old URL here, which is
            // what the refresh fan-out looks up.
            for (old_item, new_item) in changed {
                touched.extend(self.emit_refresh_item(&old_item, &new_item));
            }
            moves.push((dir, new_dir));
        }
        self.flush_listers(touched);

        for (from, to) in &moves {
            self.store.rekey_in_use(from, to);
            if let Some(record) = self.store.in_use_handle(to).and_then(|h| self.store.get(h)) {
                let canonical = record.canonical_url().map(|c| (c, record.url().clone()));
                if let Some((canonical, alias)) = canonical {
                    let aliases = self.canonical_urls.entry(canonical).or_default();
                    if !aliases.contains(&alias) {
                        aliases.push(alias);
                    }
                }
            }
        }
        for (from, to) in moves {
            self.emit_redirections(&from, &to);
        }
        self.remove_dir_from_cache(old);
        self.prune_canonical_urls();
    }

    /// Move the registrations of `old` to `new` and re-list it for the
    /// listers that were still listing.
    fn emit_redirections(&mut self, old: &Url, new: &Url) {
        if let Some(job) = self.job_for_url(old) {
            debug!("Killing {job}, its directory moved");
            self.kill_job(job);
        }
        let Some(data) = self.registry.remove(old) else {
            return;
        };
        let listers = data.listing();
        let holders = data.holding();
        self.registry.entry(new).absorb(data);

        for id in &listers {
            if let Some(lister) = self.listers.get_mut(id) {
                lister.emit(ListerEvent::ListingDirCanceled(old.clone()));
                lister.redirect(old, new, true);
            }
        }
        for id in &holders {
            if let Some(lister) = self.listers.get_mut(id) {
                lister.redirect(old, new, true);
            }
        }
        if !listers.is_empty() {
            self.update_directory(new);
            for id in &listers {
                self.emit_to(*id, ListerEvent::Started(new.clone()));
            }
        }
    }

    /// Drop every in-use record at or below `url` with its registrations,
    /// then its cached copies.
    pub(crate) fn delete_dir(&mut self, url: &Url) {
        let url = url.adjusted();
        let affected: Vec<Url> = self
            .store
            .in_use_urls()
            .into_iter()
            .filter(|dir| dir == &url || url.is_parent_of(dir))
            .collect();

        for dir in affected {
            for id in self.registry.listing(&dir) {
                self.stop_listing_url(id, &dir, false);
            }
            for id in self.registry.holding(&dir) {
                self.delete_dir_for(id, &dir);
            }
            if self.store.is_in_use(&dir) {
                warn!("{dir} is still in use after being deleted");
            }
        }
        self.remove_dir_from_cache(&url);
    }

    fn delete_dir_for(&mut self, id: ListerId, dir: &Url) {
        let Some(lister) = self.listers.get_mut(&id) else {
            return;
        };
        if lister.url.as_ref() == Some(dir) {
            let mut gone: Vec<Item> = lister.root_item.take().into_iter().collect();
            for shown in &lister.dirs {
                if shown == dir || dir.is_parent_of(shown) {
                    if let Some(record) = self.store.record(shown) {
                        gone.extend(record.items().iter().filter(|i| lister.shows(i)).cloned());
                    }
                }
            }
            if !gone.is_empty() {
                lister.emit(ListerEvent::ItemsDeleted(gone));
            }
            lister.emit(ListerEvent::Clear);
            self.forget_all(id);
        } else if lister.dirs.len() > 1 {
            self.forget_dir_inner(id, dir, true);
        } else {
            lister.emit(ListerEvent::Clear);
            lister.dirs.clear();
            self.forget_dir_inner(id, dir, false);
        }
    }

    /// Drop cached records at or below `url`.
    pub(crate) fn remove_dir_from_cache(&mut self, url: &Url) {
        for cached in self.store.cached_urls() {
            if &cached == url || url.is_parent_of(&cached) {
                debug!("Dropping cached {cached}");
                self.store.remove_cached(&cached);
            }
        }
    }

    /// Re-stat the files and re-list the directories collected by watch
    /// events. Runs when the debounce deadline passes.
    pub fn process_pending_updates(&mut self) {
        self.pending_deadline = None;

        let mut touched = BTreeSet::new();
        for path in std::mem::take(&mut self.pending_updates) {
            let Some(url) = url_from_path(&path) else {
                continue;
            };
            let Some(item) = self.find_by_url(None, &url) else {
                continue;
            };
            let mut fresh = item.clone();
            if !fresh.refresh() {
                debug!("Cannot re-stat {}", path.display());
                continue;
            }
            if !item.same_state_as(&fresh) {
                self.reinsert(&fresh, item.url());
                touched.extend(self.emit_refresh_item(&item, &fresh));
            }
        }
        self.flush_listers(touched);

        for dir in std::mem::take(&mut self.pending_dir_updates) {
            if let Some(url) = url_from_path(&dir) {
                self.update_directory(&url);
            }
        }
    }
}
