//! Per-lister visibility filters.

use regex_lite::Regex;
use vfs_item::{DEFAULT_MIME_TYPE, Item};

/// MIME filter value meaning "everything".
const ALL_FILES_MIME_TYPE: &str = "all/allfiles";

/// What a lister shows. Compared as a whole to detect staged changes.
#[derive(Debug, Clone, Default)]
pub struct FilterSettings {
    show_hidden: bool,
    dir_only: bool,
    name_filter: String,
    name_patterns: Vec<Regex>,
    mime_filter: Vec<String>,
    mime_exclude: Vec<String>,
}

impl PartialEq for FilterSettings {
    fn eq(&self, other: &Self) -> bool {
        self.show_hidden == other.show_hidden
            && self.dir_only == other.dir_only
            && self.name_filter == other.name_filter
            && self.mime_filter == other.mime_filter
            && self.mime_exclude == other.mime_exclude
    }
}

impl FilterSettings {
    pub fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    pub fn set_show_hidden(&mut self, show: bool) {
        self.show_hidden = show;
    }

    pub fn dir_only(&self) -> bool {
        self.dir_only
    }

    pub fn set_dir_only(&mut self, dir_only: bool) {
        self.dir_only = dir_only;
    }

    /// The name filter as last set.
    pub fn name_filter(&self) -> &str {
        &self.name_filter
    }

    /// Set whitespace-separated wildcard patterns (`*.txt *.md`). Matching
    /// is case-insensitive. An empty string removes the filter.
    pub fn set_name_filter(&mut self, filter: &str) {
        self.name_filter = filter.to_string();
        self.name_patterns = filter
            .split_whitespace()
            .filter_map(|pattern| Regex::new(&wildcard_to_regex(pattern)).ok())
            .collect();
    }

    pub fn mime_filter(&self) -> &[String] {
        &self.mime_filter
    }

    /// Only show items of these MIME types. A list containing the default
    /// type or `all/allfiles` clears the filter.
    pub fn set_mime_filter(&mut self, mime_types: Vec<String>) {
        if mime_types
            .iter()
            .any(|m| m == DEFAULT_MIME_TYPE || m == ALL_FILES_MIME_TYPE)
        {
            self.mime_filter.clear();
        } else {
            self.mime_filter = mime_types;
        }
    }

    pub fn mime_exclude_filter(&self) -> &[String] {
        &self.mime_exclude
    }

    /// Hide items of these MIME types.
    pub fn set_mime_exclude_filter(&mut self, mime_types: Vec<String>) {
        self.mime_exclude = mime_types;
    }

    /// Remove the MIME include and exclude filters.
    pub fn clear_mime_filter(&mut self) {
        self.mime_filter.clear();
        self.mime_exclude.clear();
    }

    /// Name filter check on an item's display text. Directories always pass.
    pub fn matches_filter(&self, item: &Item) -> bool {
        if item.text() == ".." {
            return false;
        }
        if !self.show_hidden && item.is_hidden() {
            return false;
        }
        if item.is_dir() || self.name_patterns.is_empty() {
            return true;
        }
        self.name_patterns.iter().any(|re| re.is_match(item.text()))
    }

    /// Include and exclude MIME checks. Skips resolving the MIME type when
    /// neither filter is set.
    pub fn matches_mime_filter(&self, item: &Item) -> bool {
        if self.mime_filter.is_empty() && self.mime_exclude.is_empty() {
            return true;
        }
        let mime = item.mime_type();
        let included = self.mime_filter.is_empty()
            || self.mime_filter.iter().any(|f| mime_inherits(mime, f));
        let excluded = self.mime_exclude.iter().any(|f| mime_inherits(mime, f));
        included && !excluded
    }

    /// Hidden, directory-only and name checks. Items failing only the MIME
    /// filter still count as visible; they are reported separately.
    pub fn is_item_visible(&self, item: &Item) -> bool {
        (!self.dir_only || item.is_dir()) && self.matches_filter(item)
    }

    /// Visible and accepted by the MIME filters.
    pub fn accepts(&self, item: &Item) -> bool {
        self.is_item_visible(item) && self.matches_mime_filter(item)
    }
}

/// Whether `mime` is `filter` or a subtype of it.
fn mime_inherits(mime: &str, filter: &str) -> bool {
    if mime == filter {
        return true;
    }
    let major = mime.split('/').next().unwrap_or_default();
    if let Some(filter_major) = filter.strip_suffix("/*") {
        return major == filter_major;
    }
    // Every text format is also plain text.
    filter == "text/plain" && major == "text"
}

fn wildcard_to_regex(pattern: &str) -> String {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?i)^");
    let mut in_class = false;
    for c in pattern.chars() {
        match c {
            '*' if !in_class => re.push_str(".*"),
            '?' if !in_class => re.push('.'),
            '[' if !in_class => {
                in_class = true;
                re.push('[');
            }
            ']' if in_class => {
                in_class = false;
                re.push(']');
            }
            '\\' if in_class => re.push_str("\\\\"),
            c if in_class => re.push(c),
            c => re.push_str(&regex_lite::escape(&c.to_string())),
        }
    }
    if in_class {
        // Unterminated class: treat the bracket literally.
        return format!("(?i)^{}$", regex_lite::escape(pattern));
    }
    re.push('$');
    re
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vfs_item::stat::{S_IFDIR, S_IFREG};
    use vfs_item::{Entry, EntryField, Url};

    fn item(name: &str, file_type: u32) -> Item {
        let dir = Url::parse("file:///tmp/a").unwrap();
        Item::from_entry(
            Entry::new()
                .with_string(EntryField::Name, name)
                .with_number(EntryField::FileType, i64::from(file_type)),
            &dir,
        )
    }

    #[test]
    fn test_name_filter_is_case_insensitive_wildcard() {
        let mut settings = FilterSettings::default();
        settings.set_name_filter("*.TXT  report-??");

        assert!(settings.is_item_visible(&item("notes.txt", S_IFREG)));
        assert!(settings.is_item_visible(&item("report-01", S_IFREG)));
        assert!(!settings.is_item_visible(&item("report-1", S_IFREG)));
        assert!(!settings.is_item_visible(&item("image.png", S_IFREG)));
        // Directories pass name filters.
        assert!(settings.is_item_visible(&item("photos", S_IFDIR)));
    }

    #[test]
    fn test_character_classes() {
        let mut settings = FilterSettings::default();
        settings.set_name_filter("[ab]*");
        assert!(settings.matches_filter(&item("alpha", S_IFREG)));
        assert!(!settings.matches_filter(&item("gamma", S_IFREG)));

        settings.set_name_filter("a.b");
        assert!(settings.matches_filter(&item("a.b", S_IFREG)));
        assert!(!settings.matches_filter(&item("axb", S_IFREG)));
    }

    #[test]
    fn test_hidden_and_dir_only() {
        let mut settings = FilterSettings::default();
        assert!(!settings.is_item_visible(&item(".profile", S_IFREG)));
        settings.set_show_hidden(true);
        assert!(settings.is_item_visible(&item(".profile", S_IFREG)));

        settings.set_dir_only(true);
        assert!(!settings.is_item_visible(&item("file", S_IFREG)));
        assert!(settings.is_item_visible(&item("dir", S_IFDIR)));
    }

    #[test]
    fn test_mime_filter() {
        let mut settings = FilterSettings::default();
        settings.set_mime_filter(vec!["text/plain".to_string()]);
        assert!(settings.accepts(&item("a.txt", S_IFREG)));
        assert!(settings.accepts(&item("page.html", S_IFREG)));
        assert!(!settings.accepts(&item("pic.png", S_IFREG)));
        // Failing only the MIME filter keeps the item "visible".
        assert!(settings.is_item_visible(&item("pic.png", S_IFREG)));

        settings.set_mime_filter(vec!["image/*".to_string()]);
        assert!(settings.accepts(&item("pic.png", S_IFREG)));

        settings.set_mime_filter(vec![
            "image/png".to_string(),
            DEFAULT_MIME_TYPE.to_string(),
        ]);
        assert_eq!(settings.mime_filter(), &[] as &[String]);
        assert!(settings.accepts(&item("a.txt", S_IFREG)));
    }

    #[test]
    fn test_mime_exclude_filter() {
        let mut settings = FilterSettings::default();
        settings.set_mime_exclude_filter(vec!["inode/directory".to_string()]);
        assert!(!settings.accepts(&item("dir", S_IFDIR)));
        assert!(settings.accepts(&item("a.txt", S_IFREG)));
    }

    #[test]
    fn test_settings_equality_ignores_compiled_patterns() {
        let mut a = FilterSettings::default();
        let mut b = FilterSettings::default();
        a.set_name_filter("*.rs");
        assert!(a != b);
        b.set_name_filter("*.rs");
        assert_eq!(a, b);
    }
}
