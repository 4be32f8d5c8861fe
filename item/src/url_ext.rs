//! URL helpers shared by the item model and the lister.
//!
//! Directory URLs are always handled in their "adjusted" form: a cleaned path
//! without a trailing slash (except for the root itself).

use std::borrow::Cow;
use std::path::Path;

use url::Url;

/// Extension methods on [`Url`] for directory bookkeeping.
pub trait UrlExt {
    /// Clean the path (`//`, `.` and `..` segments) and strip any trailing
    /// slash except on the root.
    fn adjusted(&self) -> Url;

    /// The directory containing this URL. The root is its own parent.
    fn parent_dir(&self) -> Url;

    /// The decoded last path segment, empty for the root.
    fn file_name(&self) -> String;

    /// Append one (unencoded) path segment.
    fn join_name(&self, name: &str) -> Url;

    /// Whether `other` lies strictly below `self`.
    fn is_parent_of(&self, other: &Url) -> bool;

    /// Re-root `self` from `old_base` onto `new_base`. Returns `None` when
    /// `self` is neither `old_base` nor below it.
    fn rebase(&self, old_base: &Url, new_base: &Url) -> Option<Url>;

    /// Whether this is a `file://` URL.
    fn is_local_file(&self) -> bool;

    /// The local path of a `file://` URL.
    fn local_path(&self) -> Option<std::path::PathBuf>;
}

impl UrlExt for Url {
    fn adjusted(&self) -> Url {
        let mut url = self.clone();
        if url.cannot_be_a_base() {
            return url;
        }
        let cleaned = clean_path(url.path());
        url.set_path(&cleaned);
        url
    }

    fn parent_dir(&self) -> Url {
        let adjusted = self.adjusted();
        let path = adjusted.path();
        let parent = match path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => path[..idx].to_string(),
        };
        let mut url = adjusted.clone();
        url.set_path(&parent);
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    fn file_name(&self) -> String {
        let adjusted = self.adjusted();
        let raw = adjusted
            .path()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        match urlencoding::decode(&raw) {
            Ok(Cow::Borrowed(s)) => s.to_string(),
            Ok(Cow::Owned(s)) => s,
            Err(_) => raw,
        }
    }

    fn join_name(&self, name: &str) -> Url {
        let mut url = self.adjusted();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(name);
        }
        url
    }

    fn is_parent_of(&self, other: &Url) -> bool {
        let base = self.adjusted();
        let other = other.adjusted();
        if base.scheme() != other.scheme()
            || base.host_str() != other.host_str()
            || base.port() != other.port()
            || base.username() != other.username()
        {
            return false;
        }
        let base_path = base.path();
        let other_path = other.path();
        if base_path == "/" {
            return other_path.len() > 1;
        }
        other_path.len() > base_path.len()
            && other_path.starts_with(base_path)
            && other_path.as_bytes()[base_path.len()] == b'/'
    }

    fn rebase(&self, old_base: &Url, new_base: &Url) -> Option<Url> {
        let me = self.adjusted();
        let old_base = old_base.adjusted();
        if me == old_base {
            return Some(new_base.adjusted());
        }
        if !old_base.is_parent_of(&me) {
            return None;
        }
        let rest = if old_base.path() == "/" {
            &me.path()[1..]
        } else {
            &me.path()[old_base.path().len() + 1..]
        };
        let mut url = new_base.adjusted();
        let joined = if url.path() == "/" {
            format!("/{rest}")
        } else {
            format!("{}/{rest}", url.path())
        };
        url.set_path(&joined);
        Some(url)
    }

    fn is_local_file(&self) -> bool {
        self.scheme() == "file"
    }

    fn local_path(&self) -> Option<std::path::PathBuf> {
        if self.is_local_file() {
            self.to_file_path().ok()
        } else {
            None
        }
    }
}

/// Build an adjusted `file://` URL from an absolute local path.
pub fn url_from_path(path: &Path) -> Option<Url> {
    Url::from_file_path(path).ok().map(|u| u.adjusted())
}

fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_adjusted_strips_trailing_slash_and_cleans() {
        assert_eq!(url("file:///tmp/a/").adjusted().as_str(), "file:///tmp/a");
        assert_eq!(url("file:///tmp//b/./c").adjusted().as_str(), "file:///tmp/b/c");
        assert_eq!(url("file:///").adjusted().as_str(), "file:///");
        assert_eq!(
            url("sftp://host/home/u/").adjusted().as_str(),
            "sftp://host/home/u"
        );
    }

    #[test]
    fn test_parent_and_file_name() {
        let u = url("file:///tmp/a/my%20file");
        assert_eq!(u.parent_dir().as_str(), "file:///tmp/a");
        assert_eq!(u.file_name(), "my file");
        assert_eq!(url("file:///tmp").parent_dir().as_str(), "file:///");
        assert_eq!(url("file:///").parent_dir().as_str(), "file:///");
        assert_eq!(url("file:///").file_name(), "");
    }

    #[test]
    fn test_join_name_encodes() {
        let dir = url("file:///tmp/a");
        assert_eq!(dir.join_name("x y").as_str(), "file:///tmp/a/x%20y");
        assert_eq!(url("file:///").join_name("etc").as_str(), "file:///etc");
        assert_eq!(dir.join_name("x y").file_name(), "x y");
    }

    #[test]
    fn test_is_parent_of() {
        let a = url("file:///tmp/a");
        assert!(a.is_parent_of(&url("file:///tmp/a/x")));
        assert!(a.is_parent_of(&url("file:///tmp/a/x/y")));
        assert!(!a.is_parent_of(&url("file:///tmp/a")));
        assert!(!a.is_parent_of(&url("file:///tmp/ab")));
        assert!(!a.is_parent_of(&url("sftp://h/tmp/a/x")));
        assert!(url("file:///").is_parent_of(&url("file:///tmp")));
    }

    #[test]
    fn test_rebase() {
        let old = url("file:///tmp/a");
        let new = url("file:///tmp/b");
        assert_eq!(
            url("file:///tmp/a/x/y").rebase(&old, &new),
            Some(url("file:///tmp/b/x/y"))
        );
        assert_eq!(old.rebase(&old, &new), Some(new.clone()));
        assert_eq!(url("file:///tmp/c").rebase(&old, &new), None);
    }
}
