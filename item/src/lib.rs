//! # VFS Item
//!
//! The entry model shared by protocol workers and the directory lister.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Entry Model                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  worker ──► Entry (field id → value) ──► Item (shared, COW)     │
//! │                  ▲                          │                   │
//! │                  │                          ▼                   │
//! │            stat (local fs)           same_state_as / mime_type  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod entry;
pub mod item;
pub mod stat;
pub mod url_ext;

pub use entry::{Entry, EntryField, EntryValue};
pub use item::{DEFAULT_MIME_TYPE, DIRECTORY_MIME_TYPE, HiddenState, Item};
pub use url_ext::{UrlExt, url_from_path};

/// Re-exported so dependents name the same `Url` type.
pub use url::Url;
