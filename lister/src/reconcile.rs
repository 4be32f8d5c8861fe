//! Folding job output into directory records.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;
use vfs_item::{Entry, Item, UrlExt};

use crate::coordinator::{DirListerCache, JobKind, RunningJob};
use crate::dir_record::WatchOwner;
use crate::error::JobError;
use crate::job::{JobEvent, JobId};
use crate::lister::{ListerEvent, ListerId};
use crate::registry::{DirectoryData, ListerStatus};

impl DirListerCache {
    /// Feed one event from job `job`. Events of jobs that already finished
    /// or were killed are dropped.
    pub fn handle_job_event(&mut self, job: JobId, event: JobEvent) {
        let Some(kind) = self.jobs.get(&job).map(|running| running.kind) else {
            debug!("Dropping {} event of finished {job}", event_name(&event));
            return;
        };
        match event {
            JobEvent::Entries(entries) => match kind {
                JobKind::List => self.slot_entries(job, entries),
                JobKind::Update => {
                    if let Some(running) = self.jobs.get_mut(&job) {
                        running.buffer.extend(entries);
                    }
                }
            },
            JobEvent::Redirection(url) => self.slot_redirection(job, url),
            JobEvent::Finished(outcome) => self.finish_job(job, outcome),
        }
    }

    pub(crate) fn finish_job(&mut self, job: JobId, outcome: Result<(), JobError>) {
        let Some(running) = self.jobs.remove(&job) else {
            return;
        };
        match running.kind {
            JobKind::List => self.slot_result(job, running, outcome),
            JobKind::Update => self.slot_update_result(job, running, outcome),
        }
    }

    /// Turn raw entries of `dir` into items. Returns the `.` item, if any,
    /// and the others sorted.
    fn items_from_entries(
        &mut self,
        dir: &Url,
        entries: Vec<Entry>,
        delayed_mime_types: bool,
    ) -> (Option<Item>, Vec<Item>) {
        let mut root = None;
        let mut items = Vec::with_capacity(entries.len());
        let mut hidden_names: Option<Arc<HashSet<String>>> = None;
        let mut hidden_checked = !self.config.read_dot_hidden;

        for entry in entries {
            let name = match entry.name() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => continue,
            };
            match name.as_str() {
                "." => {
                    let mut item = Item::from_entry(entry, dir);
                    item.set_delayed_mime_types(delayed_mime_types);
                    root = Some(item);
                }
                ".." => {}
                _ => {
                    let mut item = Item::from_entry(entry, dir);
                    item.set_delayed_mime_types(delayed_mime_types);
                    if !hidden_checked {
                        hidden_checked = true;
                        hidden_names = item
                            .local_path()
                            .and_then(|p| p.parent().map(|d| d.to_path_buf()))
                            .and_then(|d| self.hidden_files.names_for_dir(&d));
                    }
                    if hidden_names.as_ref().is_some_and(|h| h.contains(&name)) {
                        item.set_hidden(true);
                    }
                    items.push(item);
                }
            }
        }
        items.sort();
        (root, items)
    }

    /// Listers still `Listing` `url` without a pending replay are done with
    /// the job and now hold the directory.
    fn move_listers_without_replay(&mut self, url: &Url) {
        let Some(data) = self.registry.get_mut(url) else {
            return;
        };
        for id in data.listing() {
            let replaying = self.listers.get(&id).is_some_and(|l| l.has_replay(url));
            if !replaying {
                data.set_status(id, ListerStatus::Holding);
            }
        }
    }

    /// Listers whose replay of `url` has not run yet: detach them from `job`
    /// and let the replay report completion.
    fn hand_over_to_replays(&mut self, job: JobId, url: &Url) {
        for id in self.registry.listing(url) {
            if let Some(lister) = self.listers.get_mut(&id) {
                lister.job_done(job);
                for replay in lister.replays.iter_mut().filter(|r| &r.url == url) {
                    replay.emit_completed = true;
                }
            }
        }
    }

    fn slot_entries(&mut self, job: JobId, entries: Vec<Entry>) {
        let Some(url) = self.jobs.get(&job).map(|j| j.url.clone()) else {
            return;
        };
        if !self.store.is_in_use(&url) {
            warn!("{job} lists {url}, which is not in use");
            return;
        }
        let listers: Vec<ListerId> = self
            .registry
            .listing(&url)
            .into_iter()
            .filter(|id| self.listers.get(id).is_some_and(|l| !l.has_replay(&url)))
            .collect();
        let delayed = !listers.is_empty()
            && listers
                .iter()
                .all(|id| self.listers.get(id).is_some_and(|l| l.delayed_mime_types));

        let (root, items) = self.items_from_entries(&url, entries, delayed);
        let root = root.map(|fresh| self.find_by_url(None, &url).unwrap_or(fresh));

        let Some(record) = self.store.in_use_record_mut(&url) else {
            return;
        };
        if let Some(root) = &root {
            record.set_root_item(Some(root.clone()));
        }
        record.insert_sorted_items(items.clone());

        for id in listers {
            let Some(lister) = self.listers.get_mut(&id) else {
                continue;
            };
            if let Some(root) = &root {
                if lister.root_item.is_none() && lister.url.as_ref() == Some(&url) {
                    lister.root_item = Some(root.clone());
                }
            }
            lister.add_new_items(&url, &items);
            lister.emit_items();
        }
    }

    fn slot_result(&mut self, job: JobId, running: RunningJob, outcome: Result<(), JobError>) {
        let url = running.url;
        let listers = self.registry.listing(&url);
        if listers.is_empty() {
            warn!("{job} for {url} finished with nobody listing");
        }
        self.move_listers_without_replay(&url);

        match outcome {
            Err(error) => {
                debug!("{job} for {url} failed: {error}");
                for id in listers {
                    let had_replay = self
                        .listers
                        .get_mut(&id)
                        .and_then(|l| l.take_replay_for(&url))
                        .is_some();
                    if had_replay {
                        if let Some(data) = self.registry.get_mut(&url) {
                            data.set_status(id, ListerStatus::Holding);
                        }
                    }
                    let Some(lister) = self.listers.get_mut(&id) else {
                        continue;
                    };
                    lister.job_done(job);
                    if error != JobError::Killed {
                        lister.emit(ListerEvent::JobError {
                            url: url.clone(),
                            error: error.clone(),
                        });
                    }
                    if !running.silent {
                        lister.emit(ListerEvent::ListingDirCanceled(url.clone()));
                        if lister.is_finished() {
                            lister.emit(ListerEvent::Canceled);
                        }
                    }
                }
            }
            Ok(()) => {
                if let Some(record) = self.store.in_use_record_mut(&url) {
                    record.set_complete(true);
                }
                self.hand_over_to_replays(job, &url);
                for id in self.registry.holding(&url) {
                    if !listers.contains(&id) {
                        continue;
                    }
                    let Some(lister) = self.listers.get_mut(&id) else {
                        continue;
                    };
                    lister.job_done(job);
                    lister.emit(ListerEvent::ListingDirCompleted(url.clone()));
                    if lister.is_finished() {
                        lister.emit(ListerEvent::Completed);
                    }
                }
            }
        }

        self.process_pending_updates();
    }

    /// Re-list `url`, diffing the result against its record.
    ///
    /// A directory that is only cached is marked dirty instead. With a job
    /// already running for `url`, the update runs again once it finishes.
    pub fn update_directory(&mut self, url: &Url) {
        let url = url.adjusted();
        if !self.check_update(&url) {
            if url.is_local_file() && self.find_by_url(None, &url).is_some_and(|i| i.is_dir()) {
                if let Some(path) = url.local_path() {
                    self.insert_pending_update(path);
                }
            }
            return;
        }

        if let Some(job) = self.job_for_url(&url) {
            debug!("{job} already lists {url}, updating again afterwards");
            if let Some(running) = self.jobs.get_mut(&job) {
                running.need_another_update = true;
            }
            return;
        }

        let listers = self.registry.listing(&url);
        let holders = self.registry.holding(&url);

        let mut flushed = false;
        for &id in &listers {
            let replay = self
                .listers
                .get_mut(&id)
                .and_then(|l| l.take_replay_for(&url));
            if let Some(mut replay) = replay {
                replay.emit_completed = false;
                self.emit_items_from_cache(id, replay);
                flushed = true;
            }
        }
        // Flushing moved the replayed listers to holding.
        let listers = self.registry.listing(&url);
        let holders_now = self.registry.holding(&url);
        if !listers.is_empty() {
            warn!("{url} has listers {listers:?} but neither a job nor a replay");
        }

        let want_mime = listers
            .iter()
            .chain(&holders_now)
            .any(|id| self.listers.get(id).is_some_and(|l| l.request_mime_while_listing));
        let job = self.start_job(&url, JobKind::Update, want_mime);

        for id in listers.iter().chain(&holders_now) {
            let Some(lister) = self.listers.get_mut(id) else {
                continue;
            };
            lister.job_started(job);
            if !flushed && holders.contains(id) {
                lister.emit(ListerEvent::Started(url.clone()));
            }
        }
    }

    /// Whether `url` is in use. A complete cached record for it is marked
    /// dirty and stops being watched.
    pub(crate) fn check_update(&mut self, url: &Url) -> bool {
        if self.store.is_in_use(url) {
            return true;
        }
        if let Some(record) = self.store.record_mut(url) {
            if record.is_complete() {
                debug!("{url} is cached, marking it dirty");
                record.set_complete(false);
                record.remove_watcher(WatchOwner::Cache);
            }
        }
        false
    }

    fn slot_update_result(
        &mut self,
        job: JobId,
        running: RunningJob,
        outcome: Result<(), JobError>,
    ) {
        let url = running.url;
        self.move_listers_without_replay(&url);
        self.hand_over_to_replays(job, &url);
        let listers = self.registry.holding(&url);

        if let Err(error) = outcome {
            debug!("Update {job} for {url} failed: {error}");
            for id in &listers {
                let Some(lister) = self.listers.get_mut(id) else {
                    continue;
                };
                lister.job_done(job);
                if error != JobError::Killed {
                    lister.emit(ListerEvent::JobError {
                        url: url.clone(),
                        error: error.clone(),
                    });
                }
                if !running.silent {
                    lister.emit(ListerEvent::ListingDirCanceled(url.clone()));
                    if lister.is_finished() {
                        lister.emit(ListerEvent::Canceled);
                    }
                }
            }
            self.pending_remote_updates.retain(|u| u.parent_dir() != url);
            self.process_pending_updates();
            return;
        }

        if !self.store.is_in_use(&url) {
            warn!("Update {job} finished for {url}, which is not in use anymore");
            self.pending_remote_updates.retain(|u| u.parent_dir() != url);
            return;
        }
        let delayed = !listers.is_empty()
            && listers
                .iter()
                .all(|id| self.listers.get(id).is_some_and(|l| l.delayed_mime_types));
        let (root, fresh) = self.items_from_entries(&url, running.buffer, delayed);

        let Some(record) = self.store.in_use_record_mut(&url) else {
            return;
        };
        record.set_complete(true);
        let new_root = match (record.root_item(), root) {
            (None, Some(root)) => {
                record.set_root_item(Some(root.clone()));
                Some(root)
            }
            _ => None,
        };

        let mut previous: HashMap<Url, Item> = record
            .items()
            .iter()
            .map(|item| (item.url().clone(), item.clone()))
            .collect();
        let mut added = Vec::new();
        let mut changed = Vec::new();
        for item in fresh {
            match previous.remove(item.url()) {
                Some(old) => {
                    let forced = self.pending_remote_updates.remove(old.url());
                    if forced || !old.same_state_as(&item) {
                        changed.push((old, item));
                    }
                }
                None => added.push(item),
            }
        }
        // Forced refreshes whose item did not come back are stale now.
        self.pending_remote_updates.retain(|u| u.parent_dir() != url);
        let mut deleted: Vec<Item> = previous.into_values().collect();
        deleted.sort();

        for (old, new) in &changed {
            record.reinsert(new.clone(), old.url());
        }
        record.insert_sorted_items(added.clone());
        for item in &deleted {
            record.remove(item.url());
        }

        for id in &listers {
            let Some(lister) = self.listers.get_mut(id) else {
                continue;
            };
            if let Some(root) = &new_root {
                if lister.root_item.is_none() && lister.url.as_ref() == Some(&url) {
                    lister.root_item = Some(root.clone());
                }
            }
            for (old, new) in &changed {
                lister.add_refresh_item(&url, old, new);
            }
            lister.add_new_items(&url, &added);
        }

        if !deleted.is_empty() {
            self.items_deleted(&listers, &deleted);
        }

        for id in &listers {
            let Some(lister) = self.listers.get_mut(id) else {
                continue;
            };
            lister.emit_items();
            lister.job_done(job);
            lister.emit(ListerEvent::ListingDirCompleted(url.clone()));
            if lister.is_finished() {
                lister.emit(ListerEvent::Completed);
            }
        }

        self.process_pending_updates();
        if running.need_another_update {
            self.update_directory(&url);
        }
    }

    /// Report `deleted` to `listers`, then drop any directories among them.
    pub(crate) fn items_deleted(&mut self, listers: &[ListerId], deleted: &[Item]) {
        for id in listers {
            if let Some(lister) = self.listers.get(id) {
                lister.emit_items_deleted(deleted);
            }
        }
        for item in deleted.iter().filter(|i| i.is_dir()) {
            self.delete_dir(item.url());
        }
    }

    /// Job `job` was redirected to `new_url`. Registrations and the record
    /// follow; if `new_url` is already known its items are delivered and the
    /// job turns into an update of it.
    fn slot_redirection(&mut self, job: JobId, new_url: Url) {
        let Some(old_url) = self.jobs.get(&job).map(|j| j.url.clone()) else {
            return;
        };
        let new_url = new_url.adjusted();
        if old_url == new_url {
            return;
        }
        debug!("{job} redirected from {old_url} to {new_url}");

        let Some(mut record) = self.store.remove_in_use(&old_url) else {
            warn!("Redirection of {old_url}, which is not in use");
            return;
        };
        let old_data = self.registry.remove(&old_url).unwrap_or_default();
        let listers = old_data.listing();
        let holders = old_data.holding();

        for &id in &listers {
            if let Some(lister) = self.listers.get_mut(&id) {
                lister.redirect(&old_url, &new_url, false);
            }
        }
        for &id in &holders {
            if let Some(lister) = self.listers.get_mut(&id) {
                lister.job_started(job);
                lister.emit(ListerEvent::Started(old_url.clone()));
                lister.redirect(&old_url, &new_url, false);
            }
        }

        let lister_watchers: Vec<WatchOwner> = record
            .watchers()
            .iter()
            .filter(|w| matches!(w, WatchOwner::Lister(_)))
            .copied()
            .collect();
        if let Some(running) = self.jobs.get_mut(&job) {
            running.url = new_url.clone();
        }

        let convert = if self.store.is_in_use(&new_url) {
            drop(record);
            let other_job = self
                .jobs
                .iter()
                .find(|(id, j)| **id != job && j.url == new_url)
                .map(|(id, _)| *id);
            if let Some(other) = other_job {
                debug!("Killing {other}, {job} takes over {new_url}");
                self.kill_job(other);
            }
            for id in self.registry.listing(&new_url) {
                if let Some(lister) = self.listers.get_mut(&id) {
                    lister.job_started(job);
                }
            }
            for id in self.registry.holding(&new_url) {
                if let Some(lister) = self.listers.get_mut(&id) {
                    lister.job_started(job);
                    lister.emit(ListerEvent::Started(new_url.clone()));
                }
            }
            self.join_redirected(&new_url, old_data, &lister_watchers);
            true
        } else if self.store.promote(&new_url).is_some() {
            drop(record);
            if let Some(record) = self.store.in_use_record_mut(&new_url) {
                record.remove_watcher(WatchOwner::Cache);
            }
            self.join_redirected(&new_url, old_data, &lister_watchers);
            true
        } else {
            record.set_root_item(None);
            record.take_items();
            record.set_complete(false);
            record.redirect(&new_url);
            self.register_canonical_url(&record);
            self.store.insert_in_use(record);
            self.registry.entry(&new_url).absorb(old_data);
            !holders.is_empty()
        };

        if convert {
            if let Some(running) = self.jobs.get_mut(&job) {
                running.kind = JobKind::Update;
            }
        }
        self.prune_canonical_urls();
    }

    /// Register the listers of a redirected job on the already known record
    /// of `url` and hand them its items.
    fn join_redirected(&mut self, url: &Url, data: DirectoryData, watchers: &[WatchOwner]) {
        let ids = data.all();
        self.registry.entry(url).absorb(data);
        let Some(record) = self.store.in_use_record_mut(url) else {
            return;
        };
        for owner in watchers {
            record.add_watcher(*owner);
        }
        let items = record.items().to_vec();
        let root = record.root_item().cloned();
        for id in ids {
            let Some(lister) = self.listers.get_mut(&id) else {
                continue;
            };
            if lister.root_item.is_none() && lister.url.as_ref() == Some(url) {
                lister.root_item = root.clone();
            }
            lister.add_new_items(url, &items);
            lister.emit_items();
        }
    }
}

fn event_name(event: &JobEvent) -> &'static str {
    match event {
        JobEvent::Entries(_) => "entries",
        JobEvent::Redirection(_) => "redirection",
        JobEvent::Finished(_) => "finished",
    }
}
