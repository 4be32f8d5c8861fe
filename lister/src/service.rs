//! Async driver for [`DirListerCache`].
//!
//! ```text
//!   ListerHandle ──┐ commands (mpsc)
//!   ListerHandle ──┼──────────────────▶ ┌───────────────────────────┐
//!   DirListerService ┘                  │ service task              │
//!                                       │   DirListerCache          │
//!   list jobs ───────── job events ───▶ │                           │
//!   DirectoryWatcher ── watch events ─▶ │   deferred replays        │
//!   DirNotifier ─────── bus messages ─▶ │   debounce deadline       │
//!                                       └─────────────┬─────────────┘
//!   ListerHandle ◀──────── ListerEvent (per lister) ──┘
//! ```
//!
//! One task owns the cache, so inputs never interleave. Cache replays run
//! only once no other input is ready, which lets a client set up its event
//! handling before cached items arrive.

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use vfs_directory_watcher::{DirectoryWatcher, WatchEvent};
use vfs_item::Item;

use crate::config::ListerConfig;
use crate::coordinator::{CacheStats, DirListerCache};
use crate::dirnotify::{DirNotification, DirNotifier};
use crate::error::{ListerError, Result};
use crate::job::{JobEventReceiver, JobSpawner};
use crate::lister::{ListerEvent, ListerId, OpenFlags, WhichItems};
use crate::local_job::LocalJobSpawner;
use crate::watch::WatchHub;

type Call = Box<dyn FnOnce(&mut DirListerCache) + Send>;

enum Command {
    Call(Call),
    Shutdown,
}

/// Run `f` on the service task and wait for its result.
async fn call<R, F>(commands: &mpsc::UnboundedSender<Command>, f: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce(&mut DirListerCache) -> R + Send + 'static,
{
    let (reply, rx) = oneshot::channel();
    commands
        .send(Command::Call(Box::new(move |cache| {
            // The caller may have stopped waiting.
            let _ = reply.send(f(cache));
        })))
        .map_err(|_| ListerError::ServiceStopped)?;
    rx.await.map_err(|_| ListerError::ServiceStopped)
}

/// A running listing service.
pub struct DirListerService {
    commands: mpsc::UnboundedSender<Command>,
    notifier: DirNotifier,
    task: JoinHandle<()>,
}

impl DirListerService {
    /// Start the service with the local job spawner and a real directory
    /// watcher. Must be called from within a tokio runtime.
    pub fn start(config: ListerConfig) -> Result<Self> {
        let runtime = Handle::try_current()?;
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let spawner = LocalJobSpawner::new(job_tx, config.list_batch_size, runtime);
        let (watcher, watch_rx) = DirectoryWatcher::new(&config.watcher)?;
        let notifier = DirNotifier::new();
        let hub = WatchHub::new(Box::new(watcher)).with_notifier(notifier.clone());
        Ok(Self::with_parts(
            config,
            Box::new(spawner),
            hub,
            job_rx,
            Some(watch_rx),
            notifier,
        ))
    }

    /// Start the service over caller-supplied collaborators.
    pub fn with_parts(
        config: ListerConfig,
        spawner: Box<dyn JobSpawner>,
        hub: WatchHub,
        job_events: JobEventReceiver,
        watch_events: Option<mpsc::UnboundedReceiver<WatchEvent>>,
        notifier: DirNotifier,
    ) -> Self {
        let cache = DirListerCache::new(config, spawner, hub);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let bus = notifier.subscribe();
        let task = tokio::spawn(run(cache, command_rx, job_events, watch_events, bus));
        info!("Directory lister service started");
        Self {
            commands,
            notifier,
            task,
        }
    }

    /// The bus this service listens on. Peers announce their changes here.
    pub fn notifier(&self) -> &DirNotifier {
        &self.notifier
    }

    pub async fn new_lister(&self) -> Result<ListerHandle> {
        let (id, events) = call(&self.commands, DirListerCache::new_lister).await?;
        Ok(ListerHandle {
            id,
            commands: self.commands.clone(),
            events,
        })
    }

    /// Run `f` against the cache on the service task.
    pub async fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut DirListerCache) -> R + Send + 'static,
    {
        call(&self.commands, f).await
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.call(|cache| cache.stats()).await
    }

    /// Re-list `url` wherever it is shown.
    pub async fn update_directory(&self, url: &Url) -> Result<()> {
        let url = url.clone();
        self.call(move |cache| cache.update_directory(&url)).await
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.commands
            .send(Command::Shutdown)
            .map_err(|_| ListerError::ServiceStopped)?;
        if let Err(e) = self.task.await {
            warn!("Lister service task failed: {e}");
        }
        Ok(())
    }
}

async fn recv_watch(
    watch_events: &mut Option<mpsc::UnboundedReceiver<WatchEvent>>,
) -> Option<WatchEvent> {
    match watch_events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut cache: DirListerCache,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut job_events: JobEventReceiver,
    mut watch_events: Option<mpsc::UnboundedReceiver<WatchEvent>>,
    mut bus: broadcast::Receiver<DirNotification>,
) {
    let mut bus_open = true;
    loop {
        let wake = cache.pending_deadline().map(tokio::time::Instant::from_std);
        let deferred = cache.has_deferred();

        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Call(f)) => f(&mut cache),
                Some(Command::Shutdown) | None => break,
            },
            Some((job, event)) = job_events.recv() => cache.handle_job_event(job, event),
            Some(event) = recv_watch(&mut watch_events) => cache.handle_watch_event(event),
            message = bus.recv(), if bus_open => match message {
                Ok(notification) => cache.handle_notification(notification),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Change bus lagged, {skipped} messages lost");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Change bus closed");
                    bus_open = false;
                }
            },
            () = tokio::time::sleep_until(wake.unwrap_or_else(tokio::time::Instant::now)), if wake.is_some() => {
                cache.process_pending_updates();
            }
            () = std::future::ready(()), if deferred => cache.run_deferred(),
        }
    }
    info!("Directory lister service stopped");
}

/// A client of the service. Events for this lister arrive on
/// [`ListerHandle::recv`]; dropping the handle forgets everything it shows.
pub struct ListerHandle {
    id: ListerId,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<ListerEvent>,
}

impl ListerHandle {
    pub fn id(&self) -> ListerId {
        self.id
    }

    /// Next event, or `None` once the service is gone.
    pub async fn recv(&mut self) -> Option<ListerEvent> {
        self.events.recv().await
    }

    /// Next event if one is queued.
    pub fn try_recv(&mut self) -> Option<ListerEvent> {
        self.events.try_recv().ok()
    }

    async fn with_cache<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut DirListerCache, ListerId) -> R + Send + 'static,
    {
        let id = self.id;
        call(&self.commands, move |cache| f(cache, id)).await
    }

    pub async fn open_url(&self, url: &Url, flags: OpenFlags) -> Result<()> {
        let url = url.clone();
        self.with_cache(move |cache, id| cache.open_url(id, &url, flags))
            .await?
    }

    pub async fn stop(&self) -> Result<()> {
        self.with_cache(|cache, id| cache.stop(id)).await?
    }

    pub async fn stop_url(&self, url: &Url) -> Result<()> {
        let url = url.clone();
        self.with_cache(move |cache, id| cache.stop_url(id, &url))
            .await?
    }

    pub async fn forget_dir(&self, url: &Url) -> Result<()> {
        let url = url.clone();
        self.with_cache(move |cache, id| cache.forget_dir(id, &url))
            .await?
    }

    pub async fn set_auto_update(&self, enable: bool) -> Result<()> {
        self.with_cache(move |cache, id| cache.set_auto_update(id, enable))
            .await?
    }

    pub async fn set_show_hidden(&self, show: bool) -> Result<()> {
        self.with_cache(move |cache, id| cache.set_show_hidden(id, show))
            .await?
    }

    pub async fn set_dir_only(&self, dir_only: bool) -> Result<()> {
        self.with_cache(move |cache, id| cache.set_dir_only(id, dir_only))
            .await?
    }

    pub async fn set_name_filter(&self, filter: &str) -> Result<()> {
        let filter = filter.to_string();
        self.with_cache(move |cache, id| cache.set_name_filter(id, &filter))
            .await?
    }

    pub async fn set_mime_filter(&self, mime_types: Vec<String>) -> Result<()> {
        self.with_cache(move |cache, id| cache.set_mime_filter(id, mime_types))
            .await?
    }

    /// Apply staged filter changes.
    pub async fn emit_changes(&self) -> Result<()> {
        self.with_cache(|cache, id| cache.emit_changes(id)).await?
    }

    pub async fn items(&self, which: WhichItems) -> Result<Vec<Item>> {
        self.with_cache(move |cache, id| cache.items(id, which))
            .await?
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Item>> {
        let name = name.to_string();
        self.with_cache(move |cache, id| cache.find_by_name(id, &name))
            .await
    }

    pub async fn find_by_url(&self, url: &Url) -> Result<Option<Item>> {
        let url = url.clone();
        self.with_cache(move |cache, id| cache.find_by_url(Some(id), &url))
            .await
    }

    pub async fn root_item(&self) -> Result<Option<Item>> {
        self.with_cache(|cache, id| cache.lister(id).and_then(|l| l.root_item().cloned()))
            .await
    }

    pub async fn is_finished(&self) -> Result<bool> {
        self.with_cache(|cache, id| cache.lister(id).is_none_or(|l| l.is_finished()))
            .await
    }
}

impl Drop for ListerHandle {
    fn drop(&mut self) {
        let id = self.id;
        let remove: Call = Box::new(move |cache| {
            if let Err(e) = cache.remove_lister(id) {
                debug!("Removing {id}: {e}");
            }
        });
        // Nothing to clean up once the service is gone.
        let _ = self.commands.send(Command::Call(remove));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use vfs_item::{UrlExt, url_from_path};

    fn disabled_service(config: ListerConfig) -> DirListerService {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let spawner = LocalJobSpawner::new(job_tx, config.list_batch_size, Handle::current());
        DirListerService::with_parts(
            config,
            Box::new(spawner),
            WatchHub::disabled(),
            job_rx,
            None,
            DirNotifier::new(),
        )
    }

    async fn until_completed(handle: &mut ListerHandle) -> Vec<ListerEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.recv().await {
            let done = event == ListerEvent::Completed;
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    fn added_names(events: &[ListerEvent]) -> Vec<String> {
        let mut names: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                ListerEvent::ItemsAdded { items, .. } => Some(items),
                _ => None,
            })
            .flatten()
            .map(|i| i.name().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_lists_local_directory() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("x"), "1").unwrap();
        std::fs::write(tmp.path().join("y"), "2").unwrap();
        let url = url_from_path(tmp.path()).unwrap();

        let service = disabled_service(ListerConfig::default());
        let mut lister = service.new_lister().await.unwrap();
        lister.open_url(&url, OpenFlags::NONE).await.unwrap();

        let events = until_completed(&mut lister).await;
        assert_eq!(events[0], ListerEvent::Started(url.clone()));
        assert_eq!(added_names(&events), vec!["x", "y"]);
        assert!(events.contains(&ListerEvent::ListingDirCompleted(url)));
        assert!(lister.root_item().await.unwrap().is_some());
        assert!(lister.is_finished().await.unwrap());

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_lister_is_served_from_cache() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("x"), "1").unwrap();
        let url = url_from_path(tmp.path()).unwrap();

        let service = disabled_service(ListerConfig::default());
        let mut first = service.new_lister().await.unwrap();
        first.open_url(&url, OpenFlags::NONE).await.unwrap();
        until_completed(&mut first).await;
        drop(first);

        let mut second = service.new_lister().await.unwrap();
        second.open_url(&url, OpenFlags::NONE).await.unwrap();
        let events = until_completed(&mut second).await;
        assert_eq!(added_names(&events), vec!["x"]);

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.in_use, 1);
        assert_eq!(stats.running_jobs, 0);
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory_reports_job_error() {
        let tmp = TempDir::new().unwrap();
        let url = url_from_path(&tmp.path().join("missing")).unwrap();

        let service = disabled_service(ListerConfig::default());
        let mut lister = service.new_lister().await.unwrap();
        lister.open_url(&url, OpenFlags::NONE).await.unwrap();

        let mut saw_error = false;
        while let Some(event) = lister.recv().await {
            match event {
                ListerEvent::JobError { error, .. } => {
                    assert_eq!(error.code(), 111);
                    saw_error = true;
                }
                ListerEvent::Canceled => break,
                _ => {}
            }
        }
        assert!(saw_error);
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bus_removal_reaches_listers() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("x"), "1").unwrap();
        std::fs::write(tmp.path().join("y"), "2").unwrap();
        let url = url_from_path(tmp.path()).unwrap();

        let service = disabled_service(ListerConfig::default());
        let mut lister = service.new_lister().await.unwrap();
        lister.open_url(&url, OpenFlags::NONE).await.unwrap();
        until_completed(&mut lister).await;

        let x = url.join_name("x");
        service
            .notifier()
            .emit(DirNotification::FilesRemoved { urls: vec![x] });

        match lister.recv().await {
            Some(ListerEvent::ItemsDeleted(items)) => {
                let names: Vec<&str> = items.iter().map(Item::name).collect();
                assert_eq!(names, vec!["x"]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        let items = lister.items(WhichItems::AllItems).await.unwrap();
        assert_eq!(items.len(), 1);
        service.shutdown().await.unwrap();
    }
}
