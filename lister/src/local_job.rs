//! In-process list jobs for `file://` URLs.

use std::path::Path;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vfs_item::stat::{self, S_IFDIR, S_IFMT};
use vfs_item::{DIRECTORY_MIME_TYPE, Entry, EntryField, UrlExt};

use crate::error::JobError;
use crate::job::{JobEvent, JobEventSender, JobId, JobSpawner, ListJob, ListRequest};

/// Lists local directories on the tokio runtime. Other schemes fail with
/// [`JobError::UnsupportedProtocol`].
pub struct LocalJobSpawner {
    events: JobEventSender,
    batch_size: usize,
    runtime: Handle,
}

impl LocalJobSpawner {
    /// Create a spawner reporting on `events`, running jobs on `runtime`.
    pub fn new(events: JobEventSender, batch_size: usize, runtime: Handle) -> Self {
        Self {
            events,
            batch_size: batch_size.max(1),
            runtime,
        }
    }
}

impl JobSpawner for LocalJobSpawner {
    fn start_listing(&mut self, request: ListRequest) -> Box<dyn ListJob> {
        let token = CancellationToken::new();
        let job = LocalListJob {
            token: token.clone(),
        };

        let events = self.events.clone();
        let batch_size = self.batch_size;
        self.runtime.spawn(async move {
            let id = request.id;
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    debug!("{id} cancelled");
                    return;
                }
                outcome = list_directory(&request, batch_size, &events) => outcome,
            };
            if events.send((id, JobEvent::Finished(outcome))).is_err() {
                debug!("{id} finished after the cache went away");
            }
        });

        Box::new(job)
    }
}

struct LocalListJob {
    token: CancellationToken,
}

impl ListJob for LocalListJob {
    fn kill(&mut self) {
        self.token.cancel();
    }
}

async fn list_directory(
    request: &ListRequest,
    batch_size: usize,
    events: &JobEventSender,
) -> Result<(), JobError> {
    let url = &request.url;
    let Some(path) = url.local_path() else {
        return Err(JobError::UnsupportedProtocol(url.scheme().to_string()));
    };

    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|e| JobError::from_io(&e, url.as_str()))?;
    if !meta.is_dir() {
        return Err(JobError::IsFile(url.to_string()));
    }

    let mut read_dir = tokio::fs::read_dir(&path)
        .await
        .map_err(|e| JobError::from_io(&e, url.as_str()))?;

    let mut batch = Vec::with_capacity(batch_size);
    let root = stat::entry_from_metadata(".", &meta);
    batch.push(with_mime(root, &path, request.mime_type_details));

    loop {
        let next = read_dir
            .next_entry()
            .await
            .map_err(|e| JobError::from_io(&e, url.as_str()))?;
        let Some(dir_entry) = next else {
            break;
        };

        let name = dir_entry.file_name().to_string_lossy().into_owned();
        let entry_path = dir_entry.path();
        match stat::entry_for_path(&entry_path, &name) {
            Ok(entry) => batch.push(with_mime(entry, &entry_path, request.mime_type_details)),
            // Raced with a deletion.
            Err(e) => debug!("Skipping {}: {e}", entry_path.display()),
        }

        if batch.len() >= batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            send(events, request.id, JobEvent::Entries(full))?;
        }
    }

    if !batch.is_empty() {
        send(events, request.id, JobEvent::Entries(batch))?;
    }
    Ok(())
}

fn send(events: &JobEventSender, id: JobId, event: JobEvent) -> Result<(), JobError> {
    events.send((id, event)).map_err(|_| {
        warn!("{id}: cache dropped its job channel");
        JobError::Internal("job event channel closed".to_string())
    })
}

fn with_mime(mut entry: Entry, path: &Path, details: bool) -> Entry {
    if !details {
        return entry;
    }
    let is_dir = entry
        .number_value(EntryField::FileType)
        .is_some_and(|t| u32::try_from(t).is_ok_and(|t| t & S_IFMT == S_IFDIR));
    let mime = if is_dir {
        DIRECTORY_MIME_TYPE
    } else {
        mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(vfs_item::DEFAULT_MIME_TYPE)
    };
    entry.insert_string(EntryField::MimeType, mime);
    entry
}
