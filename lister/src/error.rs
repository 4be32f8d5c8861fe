//! Error types for the directory lister.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lister::ListerId;

/// Result type alias for lister operations.
pub type Result<T> = std::result::Result<T, ListerError>;

/// Failure reported by a list job. Delivered verbatim to every lister that
/// shared the job.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobError {
    /// The job was killed before it finished.
    #[error("the job was killed")]
    Killed,

    /// Worker-side failure with no better classification.
    #[error("internal error: {0}")]
    Internal(String),

    /// The URL could not be parsed or used.
    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    /// No worker handles the URL's scheme.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// The URL names a file, not a directory.
    #[error("is a file, not a directory: {0}")]
    IsFile(String),

    /// Nothing exists at the URL.
    #[error("does not exist: {0}")]
    DoesNotExist(String),

    /// Permission denied.
    #[error("access denied: {0}")]
    AccessDenied(String),
}

impl JobError {
    /// Stable numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Killed => 1,
            Self::Internal(_) => 104,
            Self::MalformedUrl(_) => 105,
            Self::UnsupportedProtocol(_) => 106,
            Self::IsFile(_) => 110,
            Self::DoesNotExist(_) => 111,
            Self::AccessDenied(_) => 115,
        }
    }

    /// Map an io error hit while listing `url`.
    pub fn from_io(error: &std::io::Error, url: &str) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::DoesNotExist(url.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::AccessDenied(url.to_string()),
            std::io::ErrorKind::NotADirectory => Self::IsFile(url.to_string()),
            _ => Self::Internal(format!("{url}: {error}")),
        }
    }
}

/// Errors returned to callers of the lister API.
#[derive(Error, Debug)]
pub enum ListerError {
    /// The lister id is not registered.
    #[error("unknown lister: {0}")]
    UnknownLister(ListerId),

    /// The URL cannot name a directory.
    #[error("invalid directory URL: {0}")]
    InvalidUrl(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Directory watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] vfs_directory_watcher::WatcherError),

    /// The service task is gone.
    #[error("lister service stopped")]
    ServiceStopped,

    /// The service was started outside a tokio runtime.
    #[error("no tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_io_errors_map_to_codes() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        let err = JobError::from_io(&missing, "file:///nope");
        assert_eq!(err, JobError::DoesNotExist("file:///nope".to_string()));
        assert_eq!(err.code(), 111);

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(JobError::from_io(&denied, "file:///root").code(), 115);
        assert_eq!(JobError::Killed.code(), 1);
    }
}
