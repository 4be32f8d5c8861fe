//! The listing coordinator.
//!
//! [`DirListerCache`] is a synchronous state machine. Every input (client
//! calls, job events, watch events, bus messages, deferred cache replays)
//! is a method call that runs to completion; notifications go out on each
//! lister's channel after the registry and records are updated.
//!
//! Job output reconciliation lives in `reconcile.rs`, change routing in
//! `router.rs`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;
use vfs_item::{Entry, Item, UrlExt};

use crate::config::ListerConfig;
use crate::cache::DirStore;
use crate::dir_record::{DirRecord, WatchOwner};
use crate::error::{JobError, ListerError, Result};
use crate::filter::FilterSettings;
use crate::hidden::HiddenFileCache;
use crate::job::{JobId, JobSpawner, ListJob, ListRequest};
use crate::lister::{ListerEvent, ListerId, ListerState, OpenFlags, PendingReplay, WhichItems};
use crate::registry::{ListerRegistry, ListerStatus};
use crate::watch::WatchHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobKind {
    /// First listing: entries are fanned out as they arrive.
    List,

    /// Re-listing: entries are buffered and diffed at the end.
    Update,
}

pub(crate) struct RunningJob {
    pub url: Url,
    pub kind: JobKind,
    pub handle: Box<dyn ListJob>,
    pub buffer: Vec<Entry>,
    pub need_another_update: bool,
    pub silent: bool,
}

/// Counters describing the cache, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub listers: usize,
    pub in_use: usize,
    pub cached: usize,
    pub running_jobs: usize,
    pub watched: usize,
    pub pending_updates: usize,
    pub deferred_replays: usize,
}

/// Shared directory-listing cache.
///
/// One instance serves any number of listers: concurrent opens of one URL
/// share a single job, unreferenced complete directories stay in a bounded
/// cache, and change notifications are fanned out to every lister holding
/// the affected directory.
pub struct DirListerCache {
    pub(crate) config: ListerConfig,
    pub(crate) store: DirStore,
    pub(crate) registry: ListerRegistry,
    pub(crate) listers: BTreeMap<ListerId, ListerState>,
    pub(crate) jobs: BTreeMap<JobId, RunningJob>,
    spawner: Box<dyn JobSpawner>,
    pub(crate) hub: WatchHub,
    pub(crate) hidden_files: HiddenFileCache,
    /// Canonical URL to the symlinked URLs listed through it.
    pub(crate) canonical_urls: HashMap<Url, Vec<Url>>,
    pub(crate) pending_updates: BTreeSet<PathBuf>,
    pub(crate) pending_dir_updates: BTreeSet<PathBuf>,
    pub(crate) pending_remote_updates: HashSet<Url>,
    pub(crate) pending_deadline: Option<Instant>,
    deferred: VecDeque<(ListerId, u64)>,
    next_lister: u64,
    next_job: u64,
    next_replay: u64,
}

impl DirListerCache {
    pub fn new(config: ListerConfig, spawner: Box<dyn JobSpawner>, hub: WatchHub) -> Self {
        info!(
            "Directory lister cache created (capacity {})",
            config.cache_capacity
        );
        Self {
            store: DirStore::new(config.cache_capacity),
            hidden_files: HiddenFileCache::new(config.hidden_cache_capacity),
            config,
            registry: ListerRegistry::default(),
            listers: BTreeMap::new(),
            jobs: BTreeMap::new(),
            spawner,
            hub,
            canonical_urls: HashMap::new(),
            pending_updates: BTreeSet::new(),
            pending_dir_updates: BTreeSet::new(),
            pending_remote_updates: HashSet::new(),
            pending_deadline: None,
            deferred: VecDeque::new(),
            next_lister: 0,
            next_job: 0,
            next_replay: 0,
        }
    }

    pub fn config(&self) -> &ListerConfig {
        &self.config
    }

    /// Register a new lister. Its notifications arrive on the returned
    /// receiver.
    pub fn new_lister(&mut self) -> (ListerId, mpsc::UnboundedReceiver<ListerEvent>) {
        self.next_lister += 1;
        let id = ListerId(self.next_lister);
        let (tx, rx) = mpsc::unbounded_channel();
        self.listers.insert(id, ListerState::new(id, tx));
        debug!("{id} registered");
        (id, rx)
    }

    /// Stop and forget everything `id` shows, then drop it.
    pub fn remove_lister(&mut self, id: ListerId) -> Result<()> {
        self.known(id)?;
        self.stop_lister(id, true);
        self.forget_all(id);
        self.listers.remove(&id);
        self.deferred.retain(|(lister, _)| *lister != id);
        debug!("{id} removed");
        Ok(())
    }

    pub fn lister(&self, id: ListerId) -> Option<&ListerState> {
        self.listers.get(&id)
    }

    fn known(&self, id: ListerId) -> Result<&ListerState> {
        self.listers.get(&id).ok_or(ListerError::UnknownLister(id))
    }

    fn known_mut(&mut self, id: ListerId) -> Result<&mut ListerState> {
        self.listers
            .get_mut(&id)
            .ok_or(ListerError::UnknownLister(id))
    }

    /// Open `url` for lister `id`.
    ///
    /// Never blocks: results arrive as [`ListerEvent`]s. A complete record
    /// (in use or cached) is replayed from a deferred step, a running job is
    /// shared, and otherwise a new job is started.
    pub fn open_url(&mut self, id: ListerId, url: &Url, flags: OpenFlags) -> Result<()> {
        let url = url.adjusted();
        if url.cannot_be_a_base() {
            return Err(ListerError::InvalidUrl(url.to_string()));
        }
        if flags.keep && self.known(id)?.has_pending_changes {
            self.emit_changes(id)?;
        }
        let lister = self.known_mut(id)?;
        lister.has_pending_changes = false;
        let had_dirs = !lister.dirs.is_empty();
        debug!("{id} opens {url} (keep: {}, reload: {})", flags.keep, flags.reload);

        if !flags.keep {
            self.stop_lister(id, true);
            self.forget_all(id);
            let lister = self.known_mut(id)?;
            lister.root_item = None;
            if had_dirs {
                lister.emit(ListerEvent::Clear);
            }
        } else if self.known(id)?.dirs.contains(&url) {
            self.stop_listing_url(id, &url, true);
            self.forget_dir_inner(id, &url, true);
            let lister = self.known_mut(id)?;
            lister.dirs.retain(|d| d != &url);
            if lister.url.as_ref() == Some(&url) {
                lister.root_item = None;
            }
        }

        let lister = self.known_mut(id)?;
        lister.dirs.push(url.clone());
        if lister.url.is_none() || !flags.keep {
            lister.url = Some(url.clone());
        }
        let auto_update = lister.auto_update;
        let want_mime = lister.request_mime_while_listing;

        let someone_listing = self
            .registry
            .get(&url)
            .is_some_and(|data| data.has_listing());

        if !someone_listing {
            self.registry.entry(&url).add_listing(id);
            let in_use = self.store.is_in_use(&url);
            let from_cache = !in_use && !flags.reload && self.store.is_cached(&url);

            if in_use || from_cache {
                if from_cache {
                    self.store.promote(&url);
                }
                if let Some(record) = self.store.in_use_record_mut(&url) {
                    if auto_update {
                        record.add_watcher(WatchOwner::Lister(id));
                    }
                    record.remove_watcher(WatchOwner::Cache);
                }
                self.emit_to(id, ListerEvent::Started(url.clone()));
                self.schedule_replay(id, &url, flags.reload, true);
            } else {
                if flags.reload {
                    self.store.remove_cached(&url);
                }
                let mut record = DirRecord::new(&url, self.hub.clone());
                if auto_update {
                    record.add_watcher(WatchOwner::Lister(id));
                }
                self.register_canonical_url(&record);
                self.store.insert_in_use(record);

                let job = self.start_job(&url, JobKind::List, want_mime);
                if let Some(lister) = self.listers.get_mut(&id) {
                    lister.job_started(job);
                    lister.emit(ListerEvent::Started(url.clone()));
                }
            }
        } else {
            self.emit_to(id, ListerEvent::Started(url.clone()));
            self.registry.entry(&url).add_listing(id);
            let job = self.job_for_url(&url);
            if let Some(job) = job {
                debug!("{id} joins {job} for {url}");
                if let Some(lister) = self.listers.get_mut(&id) {
                    lister.job_started(job);
                }
            }
            match self.store.in_use_record_mut(&url) {
                Some(record) => {
                    if auto_update {
                        record.add_watcher(WatchOwner::Lister(id));
                    }
                }
                None => warn!("{url} is being listed but has no record"),
            }
            self.schedule_replay(id, &url, flags.reload, job.is_none());
        }
        Ok(())
    }

    /// Stop every listing of `id`.
    pub fn stop(&mut self, id: ListerId) -> Result<()> {
        self.known(id)?;
        self.stop_lister(id, false);
        Ok(())
    }

    /// Stop listing `url` for `id`. Stopping something already stopped does
    /// nothing.
    pub fn stop_url(&mut self, id: ListerId, url: &Url) -> Result<()> {
        self.known(id)?;
        self.stop_listing_url(id, &url.adjusted(), false);
        Ok(())
    }

    /// Stop and drop `url` from what `id` shows.
    pub fn forget_dir(&mut self, id: ListerId, url: &Url) -> Result<()> {
        self.known(id)?;
        let url = url.adjusted();
        self.stop_listing_url(id, &url, true);
        self.forget_dir_inner(id, &url, true);
        Ok(())
    }

    /// Stop and drop everything `id` shows.
    pub fn forget_dirs(&mut self, id: ListerId) -> Result<()> {
        self.known(id)?;
        self.stop_lister(id, true);
        self.forget_all(id);
        Ok(())
    }

    pub(crate) fn stop_lister(&mut self, id: ListerId, silent: bool) {
        let Some(lister) = self.listers.get(&id) else {
            return;
        };
        let urls: Vec<Url> = lister
            .dirs
            .iter()
            .filter(|url| {
                self.registry.status(url, id) == Some(ListerStatus::Listing)
                    || lister.has_replay(url)
            })
            .cloned()
            .collect();
        for url in urls {
            self.stop_listing_url(id, &url, silent);
        }
    }

    /// Returns false when nobody lists or holds `url`.
    pub(crate) fn stop_listing_url(&mut self, id: ListerId, url: &Url, silent: bool) -> bool {
        let replay = self
            .listers
            .get_mut(&id)
            .and_then(|lister| lister.take_replay_for(url));
        if replay.is_some() {
            self.forget_replay(id, url);
            if !silent {
                self.emit_canceled(id, url);
            }
        }
        // Cancellation of the replay above already told the lister.
        let silent = silent || replay.is_some();

        let Some(data) = self.registry.get_mut(url) else {
            return false;
        };
        if data.status(id) != Some(ListerStatus::Listing) {
            return true;
        }

        if data.listing().len() == 1 {
            self.stop_list_job(url, silent);
        } else {
            data.set_status(id, ListerStatus::Holding);
            if let Some(job) = self.job_for_url(url) {
                debug!("{id} leaves {job}, other listers keep it");
                if let Some(lister) = self.listers.get_mut(&id) {
                    lister.job_done(job);
                }
            }
            if !silent {
                self.emit_canceled(id, url);
            }
        }
        true
    }

    fn emit_canceled(&self, id: ListerId, url: &Url) {
        if let Some(lister) = self.listers.get(&id) {
            lister.emit(ListerEvent::ListingDirCanceled(url.clone()));
            if lister.is_finished() {
                lister.emit(ListerEvent::Canceled);
            }
        }
    }

    /// Kill the job for `url` and report it as killed to its listers.
    fn stop_list_job(&mut self, url: &Url, silent: bool) {
        let Some(job) = self.job_for_url(url) else {
            return;
        };
        debug!("Killing {job} for {url}");
        if let Some(running) = self.jobs.get_mut(&job) {
            running.silent = silent;
            running.handle.kill();
        }
        self.finish_job(job, Err(JobError::Killed));
    }

    pub(crate) fn forget_all(&mut self, id: ListerId) {
        let Some(lister) = self.listers.get_mut(&id) else {
            return;
        };
        let dirs = std::mem::take(&mut lister.dirs);
        for url in dirs {
            self.forget_dir_inner(id, &url, false);
        }
    }

    /// Drop the registration of `id` on `url`. A record nobody references
    /// any longer moves to the cache when complete and is destroyed
    /// otherwise.
    pub(crate) fn forget_dir_inner(&mut self, id: ListerId, url: &Url, notify: bool) {
        let job = self.job_for_url(url);
        if let Some(lister) = self.listers.get_mut(&id) {
            if let Some(job) = job {
                lister.job_done(job);
            }
            lister.take_replay_for(url);
            if notify {
                lister.dirs.retain(|d| d != url);
                lister.emit(ListerEvent::ClearDir(url.clone()));
            }
        }

        let Some(data) = self.registry.get_mut(url) else {
            return;
        };
        if data.remove(id) == Some(ListerStatus::Listing) {
            debug!("{id} forgets {url} while still listing it");
        }
        let unused = data.is_empty();
        let cacheable = unused
            && self
                .store
                .in_use_record(url)
                .is_some_and(DirRecord::is_complete);

        if let Some(record) = self.store.in_use_record_mut(url) {
            if cacheable {
                if self.config.keep_watch_while_cached {
                    record.add_watcher(WatchOwner::Cache);
                } else {
                    // Stored dirty: the next visit replays it and re-lists.
                    record.set_complete(false);
                }
            }
            record.remove_watcher(WatchOwner::Lister(id));
        }
        if !unused {
            return;
        }

        self.registry.remove(url);
        if let Some(job) = job {
            debug!("Killing update {job} for unused {url}");
            self.kill_job(job);
            if let Some(lister) = self.listers.get(&id) {
                if lister.is_finished() {
                    lister.emit(ListerEvent::Canceled);
                }
            }
        }

        if cacheable {
            for record in self.store.move_to_cache(url) {
                debug!("{} evicted from the cache", record.url());
            }
        } else {
            self.store.remove_in_use(url);
        }
        self.prune_canonical_urls();
    }

    /// Enable or disable watching for every directory of `id`.
    pub fn set_auto_update(&mut self, id: ListerId, enable: bool) -> Result<()> {
        let lister = self.known_mut(id)?;
        if lister.auto_update == enable {
            return Ok(());
        }
        lister.auto_update = enable;
        let dirs = lister.dirs.clone();
        for url in dirs {
            self.set_watch(id, &url, enable);
        }
        Ok(())
    }

    /// Enable or disable watching of one directory of `id`.
    pub fn set_auto_update_for(&mut self, id: ListerId, url: &Url, enable: bool) -> Result<()> {
        let url = url.adjusted();
        if !self.known(id)?.dirs.contains(&url) {
            debug!("{id} does not show {url}, ignoring auto-update change");
            return Ok(());
        }
        self.set_watch(id, &url, enable);
        Ok(())
    }

    fn set_watch(&mut self, id: ListerId, url: &Url, enable: bool) {
        if let Some(record) = self.store.in_use_record_mut(url) {
            if enable {
                record.add_watcher(WatchOwner::Lister(id));
            } else {
                record.remove_watcher(WatchOwner::Lister(id));
            }
        }
    }

    /// Run `change` on the settings of `id`, staging it for
    /// [`DirListerCache::emit_changes`] when it changes anything.
    fn change_settings(
        &mut self,
        id: ListerId,
        change: impl FnOnce(&mut FilterSettings),
    ) -> Result<()> {
        let lister = self.known_mut(id)?;
        let mut settings = lister.settings.clone();
        change(&mut settings);
        if settings != lister.settings {
            lister.prepare_for_settings_change();
            lister.settings = settings;
        }
        Ok(())
    }

    pub fn set_show_hidden(&mut self, id: ListerId, show: bool) -> Result<()> {
        self.change_settings(id, |s| s.set_show_hidden(show))
    }

    pub fn set_dir_only(&mut self, id: ListerId, dir_only: bool) -> Result<()> {
        self.change_settings(id, |s| s.set_dir_only(dir_only))
    }

    /// Whitespace-separated wildcard patterns matched against item names.
    pub fn set_name_filter(&mut self, id: ListerId, filter: &str) -> Result<()> {
        self.change_settings(id, |s| s.set_name_filter(filter))
    }

    pub fn set_mime_filter(&mut self, id: ListerId, mime_types: Vec<String>) -> Result<()> {
        self.change_settings(id, |s| s.set_mime_filter(mime_types))
    }

    pub fn set_mime_exclude_filter(&mut self, id: ListerId, mime_types: Vec<String>) -> Result<()> {
        self.change_settings(id, |s| s.set_mime_exclude_filter(mime_types))
    }

    pub fn clear_mime_filter(&mut self, id: ListerId) -> Result<()> {
        self.change_settings(id, FilterSettings::clear_mime_filter)
    }

    pub fn set_delayed_mime_types(&mut self, id: ListerId, delayed: bool) -> Result<()> {
        self.known_mut(id)?.delayed_mime_types = delayed;
        Ok(())
    }

    /// Ask jobs to resolve MIME types. Turning this on drops the lister's
    /// directories, along with cached copies listed without MIME types.
    pub fn set_request_mime_type_while_listing(&mut self, id: ListerId, request: bool) -> Result<()> {
        let lister = self.known_mut(id)?;
        if lister.request_mime_while_listing == request {
            return Ok(());
        }
        lister.request_mime_while_listing = request;
        if request {
            let dirs = lister.dirs.clone();
            self.stop_lister(id, true);
            self.forget_all(id);
            for url in dirs {
                if self.store.remove_cached(&url).is_some() {
                    debug!("Dropped cached {url} listed without MIME types");
                }
            }
        }
        Ok(())
    }

    /// Apply staged settings changes: items that became visible are added,
    /// items that became invisible are deleted.
    pub fn emit_changes(&mut self, id: ListerId) -> Result<()> {
        let lister = self
            .listers
            .get_mut(&id)
            .ok_or(ListerError::UnknownLister(id))?;
        let Some(old) = lister.take_settings_change() else {
            return Ok(());
        };
        if old == lister.settings {
            return Ok(());
        }

        for dir in lister.dirs.clone() {
            let Some(record) = self.store.record(&dir) else {
                continue;
            };
            let mut deleted = Vec::new();
            for item in record.items() {
                let was_shown = old.accepts(item);
                let shown = lister.shows(item);
                if shown && !was_shown {
                    lister.add_new_item(&dir, item);
                } else if was_shown && !shown {
                    deleted.push(item.clone());
                }
            }
            if !deleted.is_empty() {
                lister.emit(ListerEvent::ItemsDeleted(deleted));
            }
            lister.emit_items();
        }
        Ok(())
    }

    /// The item for `url`, looked up in its parent's record and then as the
    /// root item of its own record. With `lister` set, only directories that
    /// lister shows are searched.
    pub fn find_by_url(&self, lister: Option<ListerId>, url: &Url) -> Option<Item> {
        let url = url.adjusted();
        let shown = |dir: &Url| match lister {
            None => true,
            Some(id) => self
                .listers
                .get(&id)
                .is_some_and(|l| l.dirs.contains(dir)),
        };

        let parent = url.parent_dir();
        if parent != url && shown(&parent) {
            if let Some(item) = self.store.record(&parent).and_then(|r| r.find(&url)) {
                return Some(item.clone());
            }
        }
        if shown(&url) {
            if let Some(root) = self.store.record(&url).and_then(DirRecord::root_item) {
                if root.url() == &url {
                    return Some(root.clone());
                }
            }
        }
        None
    }

    /// First item named `name` in the directories of `id`.
    pub fn find_by_name(&self, id: ListerId, name: &str) -> Option<Item> {
        let lister = self.listers.get(&id)?;
        lister.dirs.iter().find_map(|dir| {
            self.store
                .in_use_record(dir)?
                .items()
                .iter()
                .find(|item| item.name() == name)
                .cloned()
        })
    }

    pub fn item_for_url(&self, url: &Url) -> Option<Item> {
        self.find_by_url(None, url)
    }

    /// Items of the in-use or cached record for `url`.
    pub fn items_for_dir(&self, url: &Url) -> Vec<Item> {
        self.store
            .record(&url.adjusted())
            .map(|r| r.items().to_vec())
            .unwrap_or_default()
    }

    /// Items of the top-level directory of `id`.
    pub fn items(&self, id: ListerId, which: WhichItems) -> Result<Vec<Item>> {
        let lister = self.known(id)?;
        match lister.url.clone() {
            Some(url) => self.items_for(id, &url, which),
            None => Ok(Vec::new()),
        }
    }

    /// Items of `dir` as lister `id` sees them.
    pub fn items_for(&self, id: ListerId, dir: &Url, which: WhichItems) -> Result<Vec<Item>> {
        let lister = self.known(id)?;
        let items = self.items_for_dir(dir);
        Ok(match which {
            WhichItems::AllItems => items,
            WhichItems::FilteredItems => items.into_iter().filter(|i| lister.shows(i)).collect(),
        })
    }

    pub fn is_in_use(&self, url: &Url) -> bool {
        self.store.is_in_use(&url.adjusted())
    }

    pub fn is_cached(&self, url: &Url) -> bool {
        self.store.is_cached(&url.adjusted())
    }

    /// Whether the record for `url` holds a live watch.
    pub fn is_watched(&self, url: &Url) -> bool {
        self.store
            .record(&url.adjusted())
            .is_some_and(DirRecord::is_watched)
    }

    /// Listers registered on `url` with their status.
    pub fn listers_of(&self, url: &Url) -> Vec<(ListerId, ListerStatus)> {
        let url = url.adjusted();
        self.registry
            .all(&url)
            .into_iter()
            .filter_map(|id| self.registry.status(&url, id).map(|s| (id, s)))
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let watched = self
            .store
            .in_use_urls()
            .into_iter()
            .chain(self.store.cached_urls())
            .filter(|url| self.store.record(url).is_some_and(DirRecord::is_watched))
            .count();
        CacheStats {
            listers: self.listers.len(),
            in_use: self.store.in_use_len(),
            cached: self.store.cached_len(),
            running_jobs: self.jobs.len(),
            watched,
            pending_updates: self.pending_updates.len() + self.pending_dir_updates.len(),
            deferred_replays: self.deferred.len(),
        }
    }

    /// Whether cache replays are waiting for [`DirListerCache::run_deferred`].
    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Run the cache replays queued so far. Replays queued while running
    /// wait for the next call.
    pub fn run_deferred(&mut self) {
        let queued = self.deferred.len();
        for _ in 0..queued {
            let Some((id, seq)) = self.deferred.pop_front() else {
                break;
            };
            let replay = self
                .listers
                .get_mut(&id)
                .and_then(|lister| lister.take_replay(seq));
            // Canceled or flushed in the meantime.
            if let Some(replay) = replay {
                self.emit_items_from_cache(id, replay);
            }
        }
    }

    /// When the debounced pending updates are due.
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending_deadline
    }

    fn schedule_replay(&mut self, id: ListerId, url: &Url, reload: bool, emit_completed: bool) {
        self.next_replay += 1;
        let seq = self.next_replay;
        if let Some(lister) = self.listers.get_mut(&id) {
            lister.replays.push(PendingReplay {
                seq,
                url: url.clone(),
                reload,
                emit_completed,
            });
            self.deferred.push_back((id, seq));
        }
    }

    /// Deliver the record for `replay.url` to `id` as if freshly listed.
    pub(crate) fn emit_items_from_cache(&mut self, id: ListerId, replay: PendingReplay) {
        let url = replay.url;
        let mut reload = replay.reload;

        match self.store.in_use_record(&url) {
            Some(record) => {
                reload = reload || !record.is_complete();
                if let Some(lister) = self.listers.get_mut(&id) {
                    if lister.root_item.is_none() && lister.url.as_ref() == Some(&url) {
                        lister.root_item = record.root_item().cloned();
                    }
                    lister.add_new_items(&url, record.items());
                    lister.emit_items();
                }
            }
            None => warn!("Cannot replay {url} for {id}: no record anymore"),
        }

        self.forget_replay(id, &url);

        if replay.emit_completed {
            if let Some(lister) = self.listers.get(&id) {
                lister.emit(ListerEvent::ListingDirCompleted(url.clone()));
                if lister.is_finished() {
                    lister.emit(ListerEvent::Completed);
                }
            }
            if reload {
                self.update_directory(&url);
            }
        }
    }

    /// A replay of `url` for `id` is over; with no job feeding the lister it
    /// now merely holds the directory.
    fn forget_replay(&mut self, id: ListerId, url: &Url) {
        if self.job_for_url(url).is_some() {
            return;
        }
        if let Some(data) = self.registry.get_mut(url) {
            data.set_status(id, ListerStatus::Holding);
        }
    }

    pub(crate) fn start_job(&mut self, url: &Url, kind: JobKind, mime_type_details: bool) -> JobId {
        self.next_job += 1;
        let id = JobId(self.next_job);
        let handle = self.spawner.start_listing(ListRequest {
            id,
            url: url.clone(),
            mime_type_details,
        });
        debug!("{id} started for {url} ({kind:?})");
        self.jobs.insert(
            id,
            RunningJob {
                url: url.clone(),
                kind,
                handle,
                buffer: Vec::new(),
                need_another_update: false,
                silent: false,
            },
        );
        id
    }

    pub(crate) fn job_for_url(&self, url: &Url) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|(_, job)| &job.url == url)
            .map(|(id, _)| *id)
    }

    /// Kill `job` without telling anyone.
    pub(crate) fn kill_job(&mut self, job: JobId) {
        if let Some(mut running) = self.jobs.remove(&job) {
            running.handle.kill();
        }
        for lister in self.listers.values_mut() {
            lister.job_done(job);
        }
    }

    pub(crate) fn emit_to(&self, id: ListerId, event: ListerEvent) {
        if let Some(lister) = self.listers.get(&id) {
            lister.emit(event);
        }
    }

    pub(crate) fn register_canonical_url(&mut self, record: &DirRecord) {
        if let Some(canonical) = record.canonical_url() {
            let aliases = self.canonical_urls.entry(canonical).or_default();
            if !aliases.contains(record.url()) {
                aliases.push(record.url().clone());
            }
        }
    }

    /// Drop aliases whose record is gone.
    pub(crate) fn prune_canonical_urls(&mut self) {
        let store = &self.store;
        self.canonical_urls.retain(|_, aliases| {
            aliases.retain(|url| store.record(url).is_some());
            !aliases.is_empty()
        });
    }

    /// Every URL `url` is listed under: itself plus its symlinked aliases.
    pub(crate) fn directories_for_canonical_path(&self, url: &Url) -> Vec<Url> {
        let mut dirs = vec![url.clone()];
        if let Some(aliases) = self.canonical_urls.get(url) {
            for alias in aliases {
                if !dirs.contains(alias) {
                    dirs.push(alias.clone());
                }
            }
        }
        dirs
    }
}
