//! # VFS Lister
//!
//! A shared cache for directory listings. Many listers can show the same
//! directories: concurrent opens share one list job, recently left
//! directories are kept in a bounded cache, and filesystem or peer change
//! notifications are fanned out to every lister holding the affected
//! directory.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       DirListerCache                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  open/stop/forget ──► ListerRegistry ──► ListerState (events)   │
//! │         │                   │                    ▲              │
//! │         ▼                   ▼                    │              │
//! │   JobSpawner ──► JobEvent ──► DirStore (arena + LRU)            │
//! │                                  │                              │
//! │                                  ▼                              │
//! │   WatchEvent / DirNotification ──► router ──► refresh / delete  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`DirListerCache`] is synchronous and driven by method calls;
//! [`DirListerService`] runs it on a tokio task and wires in the local job
//! spawner, the directory watcher and the change bus.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod dir_record;
pub mod dirnotify;
pub mod error;
pub mod filter;
pub mod hidden;
pub mod job;
pub mod lister;
pub mod local_job;
mod reconcile;
pub mod registry;
mod router;
pub mod service;
pub mod watch;

pub use config::ListerConfig;
pub use coordinator::{CacheStats, DirListerCache};
pub use dir_record::{DirRecord, WatchOwner};
pub use dirnotify::{DirNotification, DirNotifier};
pub use error::{JobError, ListerError, Result};
pub use filter::FilterSettings;
pub use job::{JobEvent, JobEventReceiver, JobEventSender, JobId, JobSpawner, ListJob, ListRequest};
pub use lister::{ListerEvent, ListerId, ListerState, OpenFlags, WhichItems};
pub use local_job::LocalJobSpawner;
pub use registry::ListerStatus;
pub use service::{DirListerService, ListerHandle};
pub use watch::{WatchGuard, WatchHub};
