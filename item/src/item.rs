//! The [`Item`] value type.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use url::Url;

use crate::entry::{Entry, EntryField};
use crate::stat::{self, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
use crate::url_ext::{UrlExt, url_from_path};

/// MIME type reported for directories.
pub const DIRECTORY_MIME_TYPE: &str = "inode/directory";

/// MIME type used when nothing better is known.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Explicit or inferred hidden state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HiddenState {
    /// Hidden iff the file name starts with a dot.
    #[default]
    Auto,
    Hidden,
    Shown,
}

#[derive(Debug, Clone)]
struct ItemData {
    entry: Entry,
    url: Url,
    name: String,
    file_mode: u32,
    permissions: Option<u32>,
    is_link: bool,
    is_local_url: bool,
    hidden: HiddenState,
    delayed_mime_types: bool,
    /// Resolved on first use.
    mime_type: OnceLock<String>,
}

/// One filesystem object as seen by a lister.
///
/// Cloning is cheap: clones share storage until one of them is mutated, at
/// which point the mutated copy gets its own (copy-on-write). Equality and
/// ordering use the URL only; use [`Item::same_state_as`] to detect changes.
#[derive(Debug, Clone)]
pub struct Item {
    d: Arc<ItemData>,
}

impl Item {
    /// Build an item from a worker entry listed inside `dir_url`.
    ///
    /// An entry named `.` describes the directory itself and gets `dir_url`.
    pub fn from_entry(entry: Entry, dir_url: &Url) -> Self {
        let name = entry.name().unwrap_or_default().to_string();
        let url = match entry
            .string_value(EntryField::Url)
            .and_then(|s| Url::parse(s).ok())
        {
            Some(explicit) => explicit.adjusted(),
            None if name.is_empty() || name == "." => dir_url.adjusted(),
            None => dir_url.join_name(&name),
        };
        Self::with_url(entry, url)
    }

    /// Build an item whose URL is already known.
    pub fn with_url(entry: Entry, url: Url) -> Self {
        let mut data = ItemData {
            entry,
            url: url.adjusted(),
            name: String::new(),
            file_mode: 0,
            permissions: None,
            is_link: false,
            is_local_url: false,
            hidden: HiddenState::Auto,
            delayed_mime_types: false,
            mime_type: OnceLock::new(),
        };
        data.init();
        Self { d: Arc::new(data) }
    }

    /// Stat a local path and build the corresponding item.
    pub fn from_local_path(path: &Path) -> std::io::Result<Self> {
        let url = url_from_path(path).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path is not absolute")
        })?;
        let entry = stat::entry_for_path(path, &url.file_name())?;
        Ok(Self::with_url(entry, url))
    }

    pub fn url(&self) -> &Url {
        &self.d.url
    }

    pub fn name(&self) -> &str {
        &self.d.name
    }

    /// Display text: the display name if the worker sent one.
    pub fn text(&self) -> &str {
        self.d
            .entry
            .string_value(EntryField::DisplayName)
            .unwrap_or(&self.d.name)
    }

    pub fn entry(&self) -> &Entry {
        &self.d.entry
    }

    /// Size in bytes, `None` when unknown.
    pub fn size(&self) -> Option<u64> {
        self.d
            .entry
            .number_value(EntryField::Size)
            .and_then(|n| u64::try_from(n).ok())
    }

    /// File type bits, 0 when unknown.
    pub fn file_mode(&self) -> u32 {
        self.d.file_mode
    }

    pub fn permissions(&self) -> Option<u32> {
        self.d.permissions
    }

    pub fn is_dir(&self) -> bool {
        self.d.file_mode == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.d.file_mode == S_IFREG
    }

    pub fn is_link(&self) -> bool {
        self.d.is_link
    }

    pub fn link_dest(&self) -> Option<&str> {
        self.d.entry.string_value(EntryField::LinkDest)
    }

    pub fn user(&self) -> Option<&str> {
        self.d.entry.string_value(EntryField::User)
    }

    pub fn group(&self) -> Option<&str> {
        self.d.entry.string_value(EntryField::Group)
    }

    pub fn modification_time(&self) -> Option<DateTime<Utc>> {
        self.time(EntryField::ModificationTime)
    }

    pub fn access_time(&self) -> Option<DateTime<Utc>> {
        self.time(EntryField::AccessTime)
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.time(EntryField::CreationTime)
    }

    fn time(&self, field: EntryField) -> Option<DateTime<Utc>> {
        let secs = self.d.entry.number_value(field)?;
        DateTime::from_timestamp(secs, 0)
    }

    pub fn hidden_state(&self) -> HiddenState {
        self.d.hidden
    }

    /// Whether the item is hidden, explicitly or by a leading dot.
    pub fn is_hidden(&self) -> bool {
        match self.d.hidden {
            HiddenState::Hidden => true,
            HiddenState::Shown => false,
            HiddenState::Auto => {
                let file_name = self.d.url.file_name();
                if file_name.is_empty() {
                    self.d.name.starts_with('.')
                } else {
                    file_name.starts_with('.')
                }
            }
        }
    }

    /// Whether the URL uses the `file` scheme.
    pub fn is_local_file(&self) -> bool {
        self.d.is_local_url
    }

    /// Local path: the worker's override, else the path of a `file` URL.
    pub fn local_path(&self) -> Option<PathBuf> {
        if let Some(p) = self.d.entry.string_value(EntryField::LocalPath) {
            return Some(PathBuf::from(p));
        }
        self.d.url.local_path()
    }

    pub fn target_url(&self) -> Option<&str> {
        self.d.entry.string_value(EntryField::TargetUrl)
    }

    pub fn icon_name(&self) -> Option<&str> {
        self.d.entry.string_value(EntryField::IconName)
    }

    pub fn delayed_mime_types(&self) -> bool {
        self.d.delayed_mime_types
    }

    /// The MIME type, determined on first call.
    ///
    /// With delayed MIME types a worker-guessed type is accepted as is.
    pub fn mime_type(&self) -> &str {
        self.d.mime_type.get_or_init(|| self.d.determine_mime_type())
    }

    /// Whether [`Item::mime_type`] found something more specific than the
    /// default type.
    pub fn is_mime_type_known(&self) -> bool {
        self.mime_type() != DEFAULT_MIME_TYPE
    }

    /// Whether `other` describes the same observable state.
    ///
    /// The MIME type is deliberately left out: it is expensive and resolved
    /// on demand.
    pub fn same_state_as(&self, other: &Item) -> bool {
        if Arc::ptr_eq(&self.d, &other.d) {
            return true;
        }
        let (a, b) = (&*self.d, &*other.d);
        let str_field = |f| a.entry.string_value(f) == b.entry.string_value(f);
        a.name == b.name
            && a.is_local_url == b.is_local_url
            && a.file_mode == b.file_mode
            && a.permissions == b.permissions
            && a.is_link == b.is_link
            && a.hidden == b.hidden
            && str_field(EntryField::User)
            && str_field(EntryField::Group)
            && a.entry.number_value(EntryField::ExtendedAcl)
                == b.entry.number_value(EntryField::ExtendedAcl)
            && str_field(EntryField::AclString)
            && str_field(EntryField::DefaultAclString)
            && str_field(EntryField::LinkDest)
            && str_field(EntryField::IconName)
            && str_field(EntryField::TargetUrl)
            && str_field(EntryField::LocalPath)
            && str_field(EntryField::DisplayName)
            && self.size() == other.size()
            && self.modification_time() == other.modification_time()
    }

    /// Change the URL; the name follows the new last path segment.
    pub fn set_url(&mut self, url: &Url) {
        let d = Arc::make_mut(&mut self.d);
        d.url = url.adjusted();
        d.is_local_url = d.url.is_local_file();
        let name = d.url.file_name();
        d.set_name(name);
    }

    /// Change the name without touching the URL.
    pub fn set_name(&mut self, name: impl Into<String>) {
        Arc::make_mut(&mut self.d).set_name(name.into());
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        Arc::make_mut(&mut self.d).hidden = if hidden {
            HiddenState::Hidden
        } else {
            HiddenState::Shown
        };
    }

    pub fn set_local_path(&mut self, path: &Path) {
        Arc::make_mut(&mut self.d)
            .entry
            .insert_string(EntryField::LocalPath, path.to_string_lossy());
    }

    pub fn set_delayed_mime_types(&mut self, delayed: bool) {
        if self.d.delayed_mime_types != delayed {
            let d = Arc::make_mut(&mut self.d);
            d.delayed_mime_types = delayed;
            d.mime_type = OnceLock::new();
        }
    }

    /// Forget the MIME type so the next query determines it again.
    pub fn refresh_mime_type(&mut self) {
        let d = Arc::make_mut(&mut self.d);
        d.entry.remove(EntryField::MimeType);
        d.entry.remove(EntryField::GuessedMimeType);
        d.mime_type = OnceLock::new();
    }

    /// Re-stat a local item. Returns false (leaving the item untouched) when
    /// the item has no local path or the stat fails.
    pub fn refresh(&mut self) -> bool {
        let Some(path) = self.local_path() else {
            return false;
        };
        let Ok(mut entry) = stat::entry_for_path(&path, &self.d.name) else {
            return false;
        };
        for field in [
            EntryField::Url,
            EntryField::LocalPath,
            EntryField::DisplayName,
            EntryField::TargetUrl,
            EntryField::IconName,
        ] {
            if let Some(v) = self.d.entry.string_value(field) {
                entry.insert_string(field, v);
            }
        }
        let d = Arc::make_mut(&mut self.d);
        d.entry = entry;
        d.hidden = HiddenState::Auto;
        d.mime_type = OnceLock::new();
        d.init();
        true
    }
}

impl ItemData {
    fn init(&mut self) {
        if let Some(name) = self.entry.name() {
            self.name = name.to_string();
        } else if self.name.is_empty() {
            self.name = self.url.file_name();
        }
        self.file_mode = self
            .entry
            .number_value(EntryField::FileType)
            .and_then(|n| u32::try_from(n).ok())
            .map(|n| n & S_IFMT)
            .unwrap_or(0);
        self.permissions = self
            .entry
            .number_value(EntryField::Access)
            .and_then(|n| u32::try_from(n).ok())
            .map(|n| n & 0o7777);
        self.is_link =
            self.entry.contains(EntryField::LinkDest) || self.file_mode == S_IFLNK;
        self.is_local_url = self.url.is_local_file();
        self.hidden = match self.entry.number_value(EntryField::Hidden) {
            Some(0) => HiddenState::Shown,
            Some(_) => HiddenState::Hidden,
            None => self.hidden,
        };
    }

    fn set_name(&mut self, name: String) {
        self.entry.insert_string(EntryField::Name, name.as_str());
        self.name = name;
        self.mime_type = OnceLock::new();
    }

    fn determine_mime_type(&self) -> String {
        if let Some(mime) = self.entry.string_value(EntryField::MimeType) {
            return mime.to_string();
        }
        if self.file_mode == S_IFDIR {
            return DIRECTORY_MIME_TYPE.to_string();
        }
        if self.delayed_mime_types {
            if let Some(guess) = self.entry.string_value(EntryField::GuessedMimeType) {
                return guess.to_string();
            }
        }
        mime_guess::from_path(&self.name)
            .first_raw()
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string()
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.d.url == other.d.url
    }
}

impl Eq for Item {}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Item {
    fn cmp(&self, other: &Self) -> Ordering {
        self.d.url.cmp(&other.d.url)
    }
}

impl Hash for Item {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.d.url.hash(state);
    }
}
