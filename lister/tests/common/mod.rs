//! Shared fixtures: a spawner that only records requests, a watch backend
//! that only counts, and helpers to build entries and read events.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use url::Url;
use vfs_directory_watcher::{Result as WatchResult, WatchBackend};
use vfs_item::stat::{S_IFDIR, S_IFREG};
use vfs_item::{Entry, EntryField, Item};
use vfs_lister::{
    DirListerCache, JobEvent, JobId, JobSpawner, ListJob, ListRequest, ListerConfig, ListerEvent,
    ListerId, OpenFlags, WatchHub,
};

/// Records every request; jobs never produce anything on their own.
#[derive(Clone, Default)]
pub struct FakeSpawner {
    pub requests: Arc<Mutex<Vec<ListRequest>>>,
    pub kills: Arc<Mutex<Vec<JobId>>>,
}

struct FakeJob {
    id: JobId,
    kills: Arc<Mutex<Vec<JobId>>>,
}

impl ListJob for FakeJob {
    fn kill(&mut self) {
        self.kills.lock().unwrap().push(self.id);
    }
}

impl JobSpawner for FakeSpawner {
    fn start_listing(&mut self, request: ListRequest) -> Box<dyn ListJob> {
        let id = request.id;
        self.requests.lock().unwrap().push(request);
        Box::new(FakeJob {
            id,
            kills: Arc::clone(&self.kills),
        })
    }
}

/// Watch operations in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOp {
    Add(PathBuf),
    Remove(PathBuf),
}

#[derive(Clone, Default)]
pub struct RecordingBackend {
    pub ops: Arc<Mutex<Vec<WatchOp>>>,
}

impl WatchBackend for RecordingBackend {
    fn add_dir(&mut self, path: &Path) -> WatchResult<()> {
        self.ops.lock().unwrap().push(WatchOp::Add(path.to_path_buf()));
        Ok(())
    }

    fn remove_dir(&mut self, path: &Path) -> WatchResult<()> {
        self.ops
            .lock()
            .unwrap()
            .push(WatchOp::Remove(path.to_path_buf()));
        Ok(())
    }
}

pub struct Harness {
    pub cache: DirListerCache,
    pub jobs: FakeSpawner,
    pub watches: RecordingBackend,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ListerConfig::default())
    }

    pub fn with_config(config: ListerConfig) -> Self {
        let jobs = FakeSpawner::default();
        let watches = RecordingBackend::default();
        let hub = WatchHub::new(Box::new(watches.clone()));
        let cache = DirListerCache::new(config, Box::new(jobs.clone()), hub);
        Self {
            cache,
            jobs,
            watches,
        }
    }

    pub fn lister(&mut self) -> (ListerId, mpsc::UnboundedReceiver<ListerEvent>) {
        self.cache.new_lister()
    }

    pub fn open(&mut self, id: ListerId, url: &Url) {
        self.cache.open_url(id, url, OpenFlags::NONE).unwrap();
    }

    pub fn requests(&self) -> Vec<ListRequest> {
        self.jobs.requests.lock().unwrap().clone()
    }

    pub fn kills(&self) -> Vec<JobId> {
        self.jobs.kills.lock().unwrap().clone()
    }

    /// Id of the most recently started job.
    pub fn last_job(&self) -> JobId {
        self.requests().last().expect("no job started").id
    }

    pub fn feed(&mut self, job: JobId, entries: Vec<Entry>) {
        self.cache.handle_job_event(job, JobEvent::Entries(entries));
    }

    pub fn finish(&mut self, job: JobId) {
        self.cache.handle_job_event(job, JobEvent::Finished(Ok(())));
    }

    /// Run a job to completion: `.` plus `entries`, then success.
    pub fn complete(&mut self, job: JobId, mut entries: Vec<Entry>) {
        entries.insert(0, dir_entry("."));
        self.feed(job, entries);
        self.finish(job);
    }

    /// Net watch references per path.
    pub fn watch_counts(&self) -> HashMap<PathBuf, i32> {
        let mut counts = HashMap::new();
        for op in self.watches.ops.lock().unwrap().iter() {
            match op {
                WatchOp::Add(path) => *counts.entry(path.clone()).or_insert(0) += 1,
                WatchOp::Remove(path) => *counts.entry(path.clone()).or_insert(0) -= 1,
            }
        }
        counts
    }

    pub fn watch_count(&self, path: &str) -> i32 {
        self.watch_counts()
            .get(Path::new(path))
            .copied()
            .unwrap_or(0)
    }

    pub fn watch_ops(&self) -> Vec<WatchOp> {
        self.watches.ops.lock().unwrap().clone()
    }
}

/// A `file://` URL for an absolute path that need not exist.
pub fn url(path: &str) -> Url {
    Url::parse(&format!("file://{path}")).unwrap()
}

pub fn file_entry(name: &str, size: i64) -> Entry {
    Entry::new()
        .with_string(EntryField::Name, name)
        .with_number(EntryField::FileType, i64::from(S_IFREG))
        .with_number(EntryField::Size, size)
}

pub fn dir_entry(name: &str) -> Entry {
    Entry::new()
        .with_string(EntryField::Name, name)
        .with_number(EntryField::FileType, i64::from(S_IFDIR))
}

pub fn file_item(dir: &Url, name: &str) -> Item {
    Item::from_entry(file_entry(name, 1), dir)
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<ListerEvent>) -> Vec<ListerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Names of all items announced by `ItemsAdded` events.
pub fn added_names(events: &[ListerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ListerEvent::ItemsAdded { items, .. } => Some(items),
            _ => None,
        })
        .flatten()
        .map(|item| item.name().to_string())
        .collect()
}

/// Names of all items announced by `ItemsDeleted` events.
pub fn deleted_names(events: &[ListerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ListerEvent::ItemsDeleted(items) => Some(items),
            _ => None,
        })
        .flatten()
        .map(|item| item.name().to_string())
        .collect()
}
