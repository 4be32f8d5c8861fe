//! Build entries from local filesystem metadata.

use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use crate::entry::{Entry, EntryField};

/// Directory file type bits.
pub const S_IFDIR: u32 = 0o040_000;
/// Regular file type bits.
pub const S_IFREG: u32 = 0o100_000;
/// Symlink file type bits.
pub const S_IFLNK: u32 = 0o120_000;
/// Mask selecting the file type part of a mode.
pub const S_IFMT: u32 = 0o170_000;

/// Stat `path` (without following a final symlink for the link target) and
/// describe it as an entry named `name`.
pub fn entry_for_path(path: &Path, name: &str) -> io::Result<Entry> {
    let link_meta = std::fs::symlink_metadata(path)?;
    if link_meta.file_type().is_symlink() {
        let dest = std::fs::read_link(path)?;
        // Broken links are still listed, with the link's own metadata.
        let meta = std::fs::metadata(path).unwrap_or(link_meta);
        let mut entry = entry_from_metadata(name, &meta);
        entry.insert_string(EntryField::LinkDest, dest.to_string_lossy());
        return Ok(entry);
    }
    Ok(entry_from_metadata(name, &link_meta))
}

/// Describe already fetched metadata.
pub fn entry_from_metadata(name: &str, meta: &Metadata) -> Entry {
    let mut entry = Entry::new().with_string(EntryField::Name, name);

    let file_type = if meta.is_dir() {
        S_IFDIR
    } else if meta.file_type().is_symlink() {
        S_IFLNK
    } else {
        S_IFREG
    };
    entry.insert_number(EntryField::FileType, i64::from(file_type));
    entry.insert_number(EntryField::Size, meta.len() as i64);

    if let Some(secs) = epoch_seconds(meta.modified()) {
        entry.insert_number(EntryField::ModificationTime, secs);
    }
    if let Some(secs) = epoch_seconds(meta.accessed()) {
        entry.insert_number(EntryField::AccessTime, secs);
    }
    if let Some(secs) = epoch_seconds(meta.created()) {
        entry.insert_number(EntryField::CreationTime, secs);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        entry.insert_number(EntryField::Access, i64::from(meta.mode() & 0o7777));
    }
    #[cfg(not(unix))]
    {
        let access = if meta.permissions().readonly() { 0o555 } else { 0o755 };
        entry.insert_number(EntryField::Access, access);
    }

    entry
}

fn epoch_seconds(time: io::Result<SystemTime>) -> Option<i64> {
    let time = time.ok()?;
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).ok(),
        Err(e) => i64::try_from(e.duration().as_secs()).ok().map(|s| -s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_entry_for_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let entry = entry_for_path(&path, "a.txt").unwrap();
        assert_eq!(entry.name(), Some("a.txt"));
        assert_eq!(entry.number_value(EntryField::Size), Some(5));
        assert_eq!(
            entry.number_value(EntryField::FileType),
            Some(i64::from(S_IFREG))
        );
        assert!(entry.contains(EntryField::ModificationTime));
        assert!(!entry.contains(EntryField::LinkDest));
    }

    #[test]
    fn test_entry_for_directory() {
        let dir = TempDir::new().unwrap();
        let entry = entry_for_path(dir.path(), ".").unwrap();
        assert_eq!(
            entry.number_value(EntryField::FileType),
            Some(i64::from(S_IFDIR))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_entry_for_symlink_follows_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        std::fs::create_dir(&target).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let entry = entry_for_path(&link, "link").unwrap();
        assert_eq!(
            entry.number_value(EntryField::FileType),
            Some(i64::from(S_IFDIR))
        );
        assert_eq!(
            entry.string_value(EntryField::LinkDest),
            Some(target.to_string_lossy().as_ref())
        );
    }
}
