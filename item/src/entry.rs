//! Worker entry records.
//!
//! An [`Entry`] is the attribute bag a protocol worker emits for every
//! filesystem object it lists. Fields are keyed by stable numeric ids so the
//! record can cross a process boundary unchanged. A field that a worker does
//! not know about is simply absent: `size` missing means "unknown", which is
//! not the same thing as `size == 0`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Marks a field id as carrying a string value.
pub const FIELD_STRING: u32 = 0x0100_0000;

/// Marks a field id as carrying an integer value.
pub const FIELD_NUMBER: u32 = 0x0200_0000;

/// Marks a field id as carrying a timestamp (seconds since the epoch).
pub const FIELD_TIME: u32 = 0x0400_0000 | FIELD_NUMBER;

/// Well-known entry fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum EntryField {
    /// Size in bytes.
    Size = 1 | FIELD_NUMBER,
    /// Owner user name.
    User = 2 | FIELD_STRING,
    /// Icon name override.
    IconName = 3 | FIELD_STRING,
    /// Owner group name.
    Group = 4 | FIELD_STRING,
    /// File name, never a path.
    Name = 5 | FIELD_STRING,
    /// Local path override for non-`file` URLs that map onto local files.
    LocalPath = 6 | FIELD_STRING,
    /// Explicit hidden flag (1 hidden, 0 shown).
    Hidden = 7 | FIELD_NUMBER,
    /// Permission bits.
    Access = 8 | FIELD_NUMBER,
    /// Last modification time.
    ModificationTime = 9 | FIELD_TIME,
    /// Last access time.
    AccessTime = 10 | FIELD_TIME,
    /// Creation time.
    CreationTime = 11 | FIELD_TIME,
    /// File type bits (`S_IFMT` part of the mode).
    FileType = 12 | FIELD_NUMBER,
    /// Symlink destination.
    LinkDest = 13 | FIELD_STRING,
    /// Explicit URL of the entry, overriding `<dir>/<name>`.
    Url = 14 | FIELD_STRING,
    /// Known MIME type.
    MimeType = 15 | FIELD_STRING,
    /// MIME type guessed by the worker without reading content.
    GuessedMimeType = 16 | FIELD_STRING,
    /// Non-zero when extended ACLs are present.
    ExtendedAcl = 17 | FIELD_NUMBER,
    /// ACL in textual form.
    AclString = 18 | FIELD_STRING,
    /// Default ACL in textual form.
    DefaultAclString = 19 | FIELD_STRING,
    /// Name to display instead of [`EntryField::Name`].
    DisplayName = 20 | FIELD_STRING,
    /// URL this entry points at (e.g. a desktop link).
    TargetUrl = 21 | FIELD_STRING,
}

impl EntryField {
    /// All known fields, in id order.
    pub const ALL: [EntryField; 21] = [
        Self::Size,
        Self::User,
        Self::IconName,
        Self::Group,
        Self::Name,
        Self::LocalPath,
        Self::Hidden,
        Self::Access,
        Self::ModificationTime,
        Self::AccessTime,
        Self::CreationTime,
        Self::FileType,
        Self::LinkDest,
        Self::Url,
        Self::MimeType,
        Self::GuessedMimeType,
        Self::ExtendedAcl,
        Self::AclString,
        Self::DefaultAclString,
        Self::DisplayName,
        Self::TargetUrl,
    ];

    /// The numeric wire id.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Look up a field by wire id.
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.id() == id)
    }

    /// Whether values of this field are strings.
    pub fn is_string(self) -> bool {
        self.id() & FIELD_STRING != 0
    }

    /// Whether values of this field are timestamps.
    pub fn is_time(self) -> bool {
        self.id() & FIELD_TIME == FIELD_TIME
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryValue {
    Number(i64),
    String(String),
}

/// Attribute bag describing one filesystem object.
///
/// Unknown ids are preserved so that workers can pass private fields through
/// the cache untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entry {
    fields: BTreeMap<u32, EntryValue>,
}

impl Entry {
    /// Create an empty entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a string field, replacing any previous value.
    pub fn insert_string(&mut self, field: EntryField, value: impl Into<String>) {
        self.fields
            .insert(field.id(), EntryValue::String(value.into()));
    }

    /// Insert a numeric field, replacing any previous value.
    pub fn insert_number(&mut self, field: EntryField, value: i64) {
        self.fields.insert(field.id(), EntryValue::Number(value));
    }

    /// Insert a raw value under an arbitrary id.
    pub fn insert_raw(&mut self, id: u32, value: EntryValue) {
        self.fields.insert(id, value);
    }

    /// Builder-style [`Entry::insert_string`].
    pub fn with_string(mut self, field: EntryField, value: impl Into<String>) -> Self {
        self.insert_string(field, value);
        self
    }

    /// Builder-style [`Entry::insert_number`].
    pub fn with_number(mut self, field: EntryField, value: i64) -> Self {
        self.insert_number(field, value);
        self
    }

    /// String value of `field`, if present and a string.
    pub fn string_value(&self, field: EntryField) -> Option<&str> {
        match self.fields.get(&field.id()) {
            Some(EntryValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Numeric value of `field`, if present and a number.
    pub fn number_value(&self, field: EntryField) -> Option<i64> {
        match self.fields.get(&field.id()) {
            Some(EntryValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Raw value stored under `id`.
    pub fn raw(&self, id: u32) -> Option<&EntryValue> {
        self.fields.get(&id)
    }

    /// Whether `field` is present.
    pub fn contains(&self, field: EntryField) -> bool {
        self.fields.contains_key(&field.id())
    }

    /// Remove `field`, returning its previous value.
    pub fn remove(&mut self, field: EntryField) -> Option<EntryValue> {
        self.fields.remove(&field.id())
    }

    /// Number of fields present.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field is present.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over `(id, value)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &EntryValue)> {
        self.fields.iter().map(|(id, v)| (*id, v))
    }

    /// Shorthand for the [`EntryField::Name`] field.
    pub fn name(&self) -> Option<&str> {
        self.string_value(EntryField::Name)
    }
}
