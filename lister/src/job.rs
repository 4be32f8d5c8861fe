//! The list job abstraction.
//!
//! A job lists one URL on behalf of the cache. It reports zero or more
//! [`JobEvent::Entries`] batches, at most one [`JobEvent::Redirection`], and
//! exactly one terminal [`JobEvent::Finished`] unless it is killed first. Jobs
//! never see listers; the cache owns them and fans their output out.

use std::fmt;

use tokio::sync::mpsc;
use url::Url;
use vfs_item::Entry;

use crate::error::JobError;

/// Identifies one job for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Output of a running job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A batch of directory entries.
    Entries(Vec<Entry>),

    /// The listed URL moved; subsequent entries belong to the new URL.
    Redirection(Url),

    /// Terminal outcome.
    Finished(Result<(), JobError>),
}

/// Channel jobs report on, tagged with their id.
pub type JobEventSender = mpsc::UnboundedSender<(JobId, JobEvent)>;

/// Receiving end of [`JobEventSender`].
pub type JobEventReceiver = mpsc::UnboundedReceiver<(JobId, JobEvent)>;

/// What the cache asks a spawner to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    /// Id the job must tag its events with.
    pub id: JobId,

    /// Directory to list.
    pub url: Url,

    /// Whether some lister wants MIME types resolved by the worker.
    pub mime_type_details: bool,
}

/// Handle on a running job.
pub trait ListJob: Send {
    /// Stop the job. No further events are expected after this returns;
    /// any that still arrive are discarded by the cache.
    fn kill(&mut self);
}

/// Starts list jobs.
pub trait JobSpawner: Send {
    /// Start listing `request.url`. Must not block.
    fn start_listing(&mut self, request: ListRequest) -> Box<dyn ListJob>;
}
