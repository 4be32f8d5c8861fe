//! Cross-process change messages.
//!
//! Peers (file managers, copy jobs, other lister services) announce changes
//! they made on a shared bus. Only the message shapes and delivery are modelled
//! here; any transport can feed [`DirNotifier::emit`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use url::Url;

/// Messages stay queued for slow subscribers up to this many.
const BUS_CAPACITY: usize = 256;

/// A change announced by some process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirNotification {
    /// `src` now lives at `dst`. `dst_path` is the new local path when the
    /// destination URL is not a `file://` URL.
    FileRenamed {
        src: Url,
        dst: Url,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dst_path: Option<PathBuf>,
    },

    /// Something appeared in `dir`.
    FilesAdded { dir: Url },

    /// Content or metadata of these items changed.
    FilesChanged { urls: Vec<Url> },

    /// These items are gone.
    FilesRemoved { urls: Vec<Url> },

    /// A peer started watching a directory.
    EnteredDirectory { url: Url },

    /// A peer stopped watching a directory.
    LeftDirectory { url: Url },
}

/// Publish/subscribe endpoint for [`DirNotification`]s.
///
/// Delivery is at-least-once per subscriber; a subscriber that falls more
/// than the bus capacity behind loses the oldest messages.
#[derive(Debug, Clone)]
pub struct DirNotifier {
    tx: broadcast::Sender<DirNotification>,
}

impl Default for DirNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DirNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DirNotification> {
        self.tx.subscribe()
    }

    /// Publish a message. Nobody listening is not an error.
    pub fn emit(&self, notification: DirNotification) {
        if self.tx.send(notification).is_err() {
            trace!("No bus subscribers");
        }
    }
}
