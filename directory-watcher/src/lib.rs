//! # Directory Watcher
//!
//! Ref-counted filesystem watches for the directory lister. Each directory
//! is watched non-recursively; several directory records may reach the same
//! canonical path (through symlinks), so watches are counted per path and the
//! OS watch lives while the count is positive.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  WatcherConfig ──► DirectoryWatcher ──► WatchEvent (channel)    │
//! │                        │                    │                   │
//! │                        ▼                    ▼                   │
//! │                 WatchBackend trait    dirty/created/deleted     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod watcher;

pub use config::{WatchMode, WatcherConfig};
pub use error::{Result, WatcherError};
pub use event::{WatchEvent, WatchEventKind};
pub use watcher::{DirectoryWatcher, WatchBackend, WatcherStats};
