//! Watch events delivered to the lister.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use serde::{Deserialize, Serialize};

/// A change observed on a watched directory or one of its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// The kind of change.
    pub kind: WatchEventKind,

    /// Path of the affected file or directory.
    pub path: PathBuf,

    /// When the event was received.
    pub timestamp: DateTime<Utc>,
}

impl WatchEvent {
    /// Create a new watch event stamped now.
    pub fn new(kind: WatchEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Utc::now(),
        }
    }

    /// Translate a notify event. Renames become a deletion of the source and
    /// a creation of the destination; pure access events are dropped unless
    /// `report_access` is set.
    pub fn from_notify(event: notify::Event, report_access: bool) -> Vec<Self> {
        use notify::EventKind;

        let kind = match event.kind {
            EventKind::Create(_) => WatchEventKind::Created,
            EventKind::Remove(_) => WatchEventKind::Deleted,
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => WatchEventKind::Deleted,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => WatchEventKind::Created,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut paths = event.paths.into_iter();
                let mut out = Vec::with_capacity(2);
                if let Some(from) = paths.next() {
                    out.push(Self::new(WatchEventKind::Deleted, from));
                }
                if let Some(to) = paths.next() {
                    out.push(Self::new(WatchEventKind::Created, to));
                }
                return out;
            }
            EventKind::Modify(_) => WatchEventKind::Dirty,
            EventKind::Access(_) if report_access => WatchEventKind::Dirty,
            EventKind::Access(_) => return Vec::new(),
            EventKind::Any | EventKind::Other => WatchEventKind::Dirty,
        };

        event
            .paths
            .into_iter()
            .map(|path| Self::new(kind, path))
            .collect()
    }
}

/// Kind of watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    /// Contents or metadata changed.
    Dirty,

    /// Entry appeared.
    Created,

    /// Entry disappeared.
    Deleted,
}
