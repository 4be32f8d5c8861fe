//! Per-lister state and the events delivered to listers.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use url::Url;
use vfs_item::Item;

use crate::error::JobError;
use crate::filter::FilterSettings;
use crate::job::JobId;

/// Identifies one lister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListerId(pub u64);

impl fmt::Display for ListerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lister#{}", self.0)
    }
}

/// How [`crate::DirListerCache::open_url`] treats what the lister already shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    /// Add the directory instead of replacing the current ones.
    pub keep: bool,

    /// Ignore cached items and list again.
    pub reload: bool,
}

impl OpenFlags {
    /// Replace everything the lister shows.
    pub const NONE: Self = Self {
        keep: false,
        reload: false,
    };

    /// Add a directory (tree views).
    pub const KEEP: Self = Self {
        keep: true,
        reload: false,
    };

    /// Replace and re-list.
    pub const RELOAD: Self = Self {
        keep: false,
        reload: true,
    };
}

/// Which items a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhichItems {
    AllItems,
    FilteredItems,
}

/// Notification delivered to a lister.
#[derive(Debug, Clone, PartialEq)]
pub enum ListerEvent {
    /// Listing of a directory began.
    Started(Url),

    /// Everything shown so far is gone.
    Clear,

    /// Everything shown for one directory is gone.
    ClearDir(Url),

    /// New items in `dir` passing the lister's filters.
    ItemsAdded { dir: Url, items: Vec<Item> },

    /// New items rejected by the MIME filters only.
    ItemsFilteredByMime(Vec<Item>),

    /// `(old, new)` pairs of changed items.
    RefreshItems(Vec<(Item, Item)>),

    /// Items that disappeared.
    ItemsDeleted(Vec<Item>),

    /// A directory moved.
    Redirection { from: Url, to: Url },

    /// One directory is fully listed.
    ListingDirCompleted(Url),

    /// Nothing is being listed for this lister anymore.
    Completed,

    /// Listing one directory was stopped.
    ListingDirCanceled(Url),

    /// Listing was stopped and nothing else is being listed.
    Canceled,

    /// The job listing `url` failed.
    JobError { url: Url, error: JobError },
}

/// A cache replay scheduled for a lister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingReplay {
    pub seq: u64,
    pub url: Url,
    pub reload: bool,
    pub emit_completed: bool,
}

/// State of one lister, owned by the cache.
#[derive(Debug)]
pub struct ListerState {
    id: ListerId,
    events: mpsc::UnboundedSender<ListerEvent>,
    pub(crate) url: Option<Url>,
    pub(crate) dirs: Vec<Url>,
    pub(crate) root_item: Option<Item>,
    pub(crate) auto_update: bool,
    pub(crate) delayed_mime_types: bool,
    pub(crate) request_mime_while_listing: bool,
    pub(crate) settings: FilterSettings,
    old_settings: FilterSettings,
    pub(crate) has_pending_changes: bool,
    pub(crate) jobs: BTreeSet<JobId>,
    pub(crate) replays: Vec<PendingReplay>,
    new_items: IndexMap<Url, Vec<Item>>,
    mime_filtered_items: Vec<Item>,
    refresh_items: Vec<(Item, Item)>,
    remove_items: Vec<Item>,
}

impl ListerState {
    pub(crate) fn new(id: ListerId, events: mpsc::UnboundedSender<ListerEvent>) -> Self {
        Self {
            id,
            events,
            url: None,
            dirs: Vec::new(),
            root_item: None,
            auto_update: true,
            delayed_mime_types: false,
            request_mime_while_listing: false,
            settings: FilterSettings::default(),
            old_settings: FilterSettings::default(),
            has_pending_changes: false,
            jobs: BTreeSet::new(),
            replays: Vec::new(),
            new_items: IndexMap::new(),
            mime_filtered_items: Vec::new(),
            refresh_items: Vec::new(),
            remove_items: Vec::new(),
        }
    }

    pub fn id(&self) -> ListerId {
        self.id
    }

    /// The top-level URL: the last one opened without `keep`.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Every directory the lister lists or holds.
    pub fn directories(&self) -> &[Url] {
        &self.dirs
    }

    /// The item describing the top-level directory, once known.
    pub fn root_item(&self) -> Option<&Item> {
        self.root_item.as_ref()
    }

    /// Whether no job and no cache replay is feeding the lister.
    pub fn is_finished(&self) -> bool {
        self.jobs.is_empty() && self.replays.is_empty()
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update
    }

    pub fn delayed_mime_types(&self) -> bool {
        self.delayed_mime_types
    }

    pub fn request_mime_type_while_listing(&self) -> bool {
        self.request_mime_while_listing
    }

    /// Current filter settings, including staged changes.
    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    pub(crate) fn emit(&self, event: ListerEvent) {
        trace!("{} <- {event:?}", self.id);
        if self.events.send(event).is_err() {
            debug!("{} dropped its event receiver", self.id);
        }
    }

    pub(crate) fn job_started(&mut self, job: JobId) {
        self.jobs.insert(job);
    }

    pub(crate) fn job_done(&mut self, job: JobId) {
        self.jobs.remove(&job);
    }

    pub(crate) fn has_replay(&self, url: &Url) -> bool {
        self.replays.iter().any(|r| &r.url == url)
    }

    /// Remove the replay with sequence number `seq`.
    pub(crate) fn take_replay(&mut self, seq: u64) -> Option<PendingReplay> {
        let pos = self.replays.iter().position(|r| r.seq == seq)?;
        Some(self.replays.remove(pos))
    }

    /// Remove the replay scheduled for `url`.
    pub(crate) fn take_replay_for(&mut self, url: &Url) -> Option<PendingReplay> {
        let pos = self.replays.iter().position(|r| &r.url == url)?;
        Some(self.replays.remove(pos))
    }

    /// Stage settings changes; [`ListerState::take_settings_change`] later
    /// yields the settings in force before the first staged change.
    pub(crate) fn prepare_for_settings_change(&mut self) {
        if !self.has_pending_changes {
            self.has_pending_changes = true;
            self.old_settings = self.settings.clone();
        }
    }

    pub(crate) fn take_settings_change(&mut self) -> Option<FilterSettings> {
        if !self.has_pending_changes {
            return None;
        }
        self.has_pending_changes = false;
        let old = std::mem::replace(&mut self.old_settings, self.settings.clone());
        Some(old)
    }

    /// Whether the lister currently shows `item`.
    pub(crate) fn shows(&self, item: &Item) -> bool {
        self.settings.accepts(item)
    }

    /// Queue a new item for [`ListerState::emit_items`].
    pub(crate) fn add_new_item(&mut self, dir: &Url, item: &Item) {
        if !self.settings.is_item_visible(item) {
            return;
        }
        if self.settings.matches_mime_filter(item) {
            self.new_items
                .entry(dir.clone())
                .or_default()
                .push(item.clone());
        } else {
            self.mime_filtered_items.push(item.clone());
        }
    }

    pub(crate) fn add_new_items(&mut self, dir: &Url, items: &[Item]) {
        for item in items {
            self.add_new_item(dir, item);
        }
    }

    /// Queue a change. Crossing the filter boundary turns the refresh into
    /// an addition or a deletion.
    pub(crate) fn add_refresh_item(&mut self, dir: &Url, old: &Item, new: &Item) {
        if dir == new.url() {
            // The lister's root item.
            self.refresh_items.push((old.clone(), new.clone()));
            return;
        }
        let was_shown = self.shows(old);
        if self.shows(new) {
            if was_shown {
                self.refresh_items.push((old.clone(), new.clone()));
            } else {
                self.new_items
                    .entry(dir.clone())
                    .or_default()
                    .push(new.clone());
            }
        } else if was_shown {
            self.remove_items.push(old.clone());
        }
    }

    /// Flush queued notifications.
    pub(crate) fn emit_items(&mut self) {
        for (dir, items) in std::mem::take(&mut self.new_items) {
            if !items.is_empty() {
                self.emit(ListerEvent::ItemsAdded { dir, items });
            }
        }
        if !self.mime_filtered_items.is_empty() {
            let items = std::mem::take(&mut self.mime_filtered_items);
            self.emit(ListerEvent::ItemsFilteredByMime(items));
        }
        if !self.refresh_items.is_empty() {
            let items = std::mem::take(&mut self.refresh_items);
            self.emit(ListerEvent::RefreshItems(items));
        }
        if !self.remove_items.is_empty() {
            let items = std::mem::take(&mut self.remove_items);
            self.emit(ListerEvent::ItemsDeleted(items));
        }
    }

    /// Report deletions of the items this lister shows.
    pub(crate) fn emit_items_deleted(&self, items: &[Item]) {
        let shown: Vec<Item> = items.iter().filter(|i| self.shows(i)).cloned().collect();
        if !shown.is_empty() {
            self.emit(ListerEvent::ItemsDeleted(shown));
        }
    }

    /// Follow a directory move from `old` to `new`.
    pub(crate) fn redirect(&mut self, old: &Url, new: &Url, keep_items: bool) {
        if self.url.as_ref() == Some(old) {
            if keep_items {
                if let Some(root) = &mut self.root_item {
                    root.set_url(new);
                }
            } else {
                self.root_item = None;
            }
            self.url = Some(new.clone());
        }

        match self.dirs.iter_mut().find(|d| *d == old) {
            Some(dir) => *dir = new.clone(),
            None => debug!(
                "{}: unexpected redirection from {old} to {new}, holding {:?}",
                self.id, self.dirs
            ),
        }
        for replay in &mut self.replays {
            if &replay.url == old {
                replay.url = new.clone();
            }
        }

        if !keep_items {
            if self.dirs.len() == 1 {
                self.emit(ListerEvent::Clear);
            } else {
                self.emit(ListerEvent::ClearDir(old.clone()));
            }
        }
        self.emit(ListerEvent::Redirection {
            from: old.clone(),
            to: new.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vfs_item::stat::S_IFREG;
    use vfs_item::{Entry, EntryField, UrlExt};

    fn dir() -> Url {
        Url::parse("file:///tmp/a").unwrap()
    }

    fn item(name: &str) -> Item {
        Item::from_entry(
            Entry::new()
                .with_string(EntryField::Name, name)
                .with_number(EntryField::FileType, i64::from(S_IFREG)),
            &dir(),
        )
    }

    fn lister() -> (ListerState, mpsc::UnboundedReceiver<ListerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ListerState::new(ListerId(1), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ListerEvent>) -> Vec<ListerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_new_items_are_filtered() {
        let (mut lister, mut rx) = lister();
        lister.add_new_items(&dir(), &[item("a"), item(".hidden-file"), item("b")]);
        lister.emit_items();

        assert_eq!(
            drain(&mut rx),
            vec![ListerEvent::ItemsAdded {
                dir: dir(),
                items: vec![item("a"), item("b")],
            }]
        );
    }

    #[test]
    fn test_mime_filtered_items_reported_separately() {
        let (mut lister, mut rx) = lister();
        lister
            .settings
            .set_mime_filter(vec!["image/png".to_string()]);
        lister.add_new_items(&dir(), &[item("a.png"), item("b.txt")]);
        lister.emit_items();

        assert_eq!(
            drain(&mut rx),
            vec![
                ListerEvent::ItemsAdded {
                    dir: dir(),
                    items: vec![item("a.png")],
                },
                ListerEvent::ItemsFilteredByMime(vec![item("b.txt")]),
            ]
        );
    }

    #[test]
    fn test_refresh_crossing_filter_boundary() {
        let (mut lister, mut rx) = lister();
        let shown = item("foo");
        let mut dotted = shown.clone();
        dotted.set_url(&dir().join_name(".foo"));

        lister.add_refresh_item(&dir(), &shown, &dotted);
        lister.emit_items();
        assert_eq!(drain(&mut rx), vec![ListerEvent::ItemsDeleted(vec![shown.clone()])]);

        lister.add_refresh_item(&dir(), &dotted, &shown);
        lister.emit_items();
        assert_eq!(
            drain(&mut rx),
            vec![ListerEvent::ItemsAdded {
                dir: dir(),
                items: vec![shown],
            }]
        );
    }

    #[test]
    fn test_redirect_updates_dirs_and_root() {
        let (mut lister, mut rx) = lister();
        lister.url = Some(dir());
        lister.dirs = vec![dir()];
        lister.root_item = Some(item("."));
        let new = Url::parse("file:///tmp/b").unwrap();

        lister.redirect(&dir(), &new, true);
        assert_eq!(lister.url(), Some(&new));
        assert_eq!(lister.directories(), &[new.clone()]);
        assert_eq!(lister.root_item().unwrap().url(), &new);
        assert_eq!(
            drain(&mut rx),
            vec![ListerEvent::Redirection { from: dir(), to: new }]
        );
    }

    #[test]
    fn test_settings_change_is_staged_once() {
        let (mut lister, _rx) = lister();
        assert!(lister.take_settings_change().is_none());

        lister.prepare_for_settings_change();
        lister.settings.set_show_hidden(true);
        lister.prepare_for_settings_change();
        lister.settings.set_dir_only(true);

        let old = lister.take_settings_change().unwrap();
        assert!(!old.show_hidden());
        assert!(!old.dir_only());
        assert!(lister.take_settings_change().is_none());
    }
}
